//! `.vmx` descriptor for a boot2docker guest

use std::path::Path;

/// Settings substituted into the descriptor
pub struct VmxSpec<'a> {
    pub name: &'a str,
    pub memory_mb: u32,
    pub cpu_count: u32,
    pub iso: &'a Path,
    pub disk: &'a Path,
}

/// Render the descriptor
///
/// The NIC uses a generated MAC on the NAT network, so the guest's address
/// shows up in the vmnet8 DHCP lease table once it boots.
pub fn render(spec: &VmxSpec<'_>) -> String {
    format!(
        r#".encoding = "UTF-8"
config.version = "8"
virtualHW.version = "10"
displayName = "{name}"
guestOS = "other3xlinux-64"
memsize = "{memory}"
numvcpus = "{cpus}"
ethernet0.present = "TRUE"
ethernet0.connectionType = "nat"
ethernet0.virtualDev = "vmxnet3"
ethernet0.addressType = "generated"
ethernet0.wakeOnPcktRcv = "FALSE"
ide1:0.present = "TRUE"
ide1:0.deviceType = "cdrom-image"
ide1:0.fileName = "{iso}"
ide1:0.autodetect = "TRUE"
ide1:0.startConnected = "TRUE"
scsi0.present = "TRUE"
scsi0.virtualDev = "lsilogic"
scsi0:0.present = "TRUE"
scsi0:0.fileName = "{disk}"
bios.bootOrder = "cdrom,hdd"
tools.syncTime = "TRUE"
msg.autoAnswer = "TRUE"
uuid.action = "create"
"#,
        name = spec.name,
        memory = spec.memory_mb,
        cpus = spec.cpu_count,
        iso = spec.iso.display(),
        disk = spec.disk.display(),
    )
}
