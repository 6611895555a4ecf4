use anyhow::{Context, Result};
use std::env;
use std::fs;

/// Writes a systemd unit so `veridom-panel serve` runs as a managed service.
pub fn install_service() -> Result<()> {
    let exe_path = env::current_exe().context("Failed to resolve current executable")?;
    let working_dir = env::current_dir().context("Failed to resolve working directory")?;

    let service_content = format!(
        r#"[Unit]
Description=Veridom Domain Verification Control Plane
After=network.target postgresql.service

[Service]
Type=simple
User=root
WorkingDirectory={}
ExecStart={} serve
Restart=always
EnvironmentFile={}/.env

[Install]
WantedBy=multi-user.target
"#,
        working_dir.display(),
        exe_path.display(),
        working_dir.display()
    );

    let service_path = "/etc/systemd/system/veridom-panel.service";
    fs::write(service_path, service_content)
        .with_context(|| format!("Failed to write {}", service_path))?;

    println!("Service unit written to {}.", service_path);
    println!("Enable it with:");
    println!("  systemctl daemon-reload");
    println!("  systemctl enable --now veridom-panel");

    Ok(())
}
