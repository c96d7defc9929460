//! Cloud-init user-data for cloud backends

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// `#cloud-config` document that installs `public_key` for `user` and
/// exposes the container engine on `engine_port`
pub fn cloud_config(public_key: &str, user: &str, engine_port: u16) -> String {
    format!(
        r#"#cloud-config
users:
  - default
  - name: {user}
    groups: [docker]
    shell: /bin/bash
    sudo: ALL=(ALL) NOPASSWD:ALL
    ssh_authorized_keys:
      - {key}
package_update: true
packages:
  - docker.io
write_files:
  - path: /etc/systemd/system/docker.service.d/tcp.conf
    content: |
      [Service]
      ExecStart=
      ExecStart=/usr/bin/dockerd -H fd:// -H tcp://0.0.0.0:{engine_port}
runcmd:
  - systemctl daemon-reload
  - systemctl enable docker
  - systemctl restart docker
"#,
        user = user,
        key = public_key.trim(),
        engine_port = engine_port,
    )
}

/// Base64 form expected by the compute API's `user_data` field
pub fn encode_user_data(user_data: &str) -> String {
    STANDARD.encode(user_data.as_bytes())
}
