//! OpenStack backend over the Keystone v2, Nova and Neutron REST APIs

mod client;

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use self::client::{AuthOptions, FloatingIp, Session};
use super::registry::RegisteredDriver;
use super::{CreateFlag, Driver, DriverOptions, dial_target, tcp_url};
use crate::error::HostError;
use crate::provision::process::SharedRunner;
use crate::provision::{self, ENGINE_READY, PollSpec, SSH_READY, poll_until, ssh, userdata};
use crate::state::MachineState;

pub const DRIVER_NAME: &str = "openstack";

const SSH_PORT: u16 = 22;
const SERVER_ACTIVE: PollSpec = PollSpec::new(60, Duration::from_secs(5));

pub fn registered() -> RegisteredDriver {
    RegisteredDriver {
        new: build,
        create_flags,
    }
}

fn build(store_path: &Path) -> Box<dyn Driver> {
    Box::new(OpenstackDriver::new(store_path))
}

fn create_flags() -> Vec<CreateFlag> {
    vec![
        CreateFlag::string("openstack-auth-endpoint", "OpenStack identity (Keystone v2) endpoint", ""),
        CreateFlag::string("openstack-username", "OpenStack username", ""),
        CreateFlag::string("openstack-password", "OpenStack password", ""),
        CreateFlag::string("openstack-tenant-id", "OpenStack tenant id", ""),
        CreateFlag::string("openstack-region", "OpenStack region name", "RegionOne"),
        CreateFlag::string("openstack-image-id", "OpenStack image id to use for the instance", ""),
        CreateFlag::string("openstack-flavor", "OpenStack flavor name or id to use for the instance", "m1.small"),
        CreateFlag::string("openstack-keypair", "OpenStack keypair to inject into the instance", ""),
        CreateFlag::string("openstack-floating-net", "OpenStack network to allocate the floating IP from", "public"),
        CreateFlag::string("openstack-floating-port", "OpenStack port to attach the floating IP to", ""),
        CreateFlag::string("openstack-security-group", "OpenStack security group for the instance", "default"),
        CreateFlag::bool("openstack-nova-net", "Use nova-network instead of Neutron for floating IPs"),
        CreateFlag::string("openstack-ssh-user", "OpenStack SSH user", "ubuntu"),
        CreateFlag::int("openstack-docker-port", "Docker engine port on the instance", 2375),
    ]
}

const REQUIRED: &[&str] = &[
    "openstack-auth-endpoint",
    "openstack-username",
    "openstack-password",
    "openstack-tenant-id",
    "openstack-image-id",
];

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct OpenstackDriver {
    pub machine_name: String,
    #[serde(rename = "MachineID")]
    pub machine_id: String,
    #[serde(rename = "IPAddress")]
    pub ip_address: String,
    #[serde(rename = "FloatingIPID")]
    pub floating_ip_id: String,
    pub identity_endpoint: String,
    pub username: String,
    pub password: String,
    #[serde(rename = "TenantID")]
    pub tenant_id: String,
    pub region: String,
    #[serde(rename = "ImageID")]
    pub image_id: String,
    pub flavor: String,
    pub keypair: String,
    pub floating_ip_network: String,
    pub floating_ip_port: String,
    pub security_group: String,
    pub nova_network: bool,
    #[serde(rename = "SSHUser")]
    pub ssh_user: String,
    pub docker_port: u16,

    #[serde(skip)]
    store_path: PathBuf,
    #[serde(skip)]
    runner: SharedRunner,
}

impl OpenstackDriver {
    pub fn new(store_path: &Path) -> Self {
        Self {
            store_path: store_path.to_path_buf(),
            ..Default::default()
        }
    }

    fn key_path(&self) -> PathBuf {
        ssh::private_key_path(&self.store_path)
    }

    fn auth_options(&self) -> AuthOptions {
        AuthOptions {
            endpoint: self.identity_endpoint.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            tenant_id: self.tenant_id.clone(),
            region: self.region.clone(),
        }
    }

    async fn session(&self) -> Result<Session, HostError> {
        Session::authenticate(&self.auth_options()).await
    }

    fn check_config(&self) -> Result<(), HostError> {
        let values = [
            &self.identity_endpoint,
            &self.username,
            &self.password,
            &self.tenant_id,
            &self.image_id,
        ];
        for (option, value) in REQUIRED.iter().zip(values) {
            if value.is_empty() {
                return Err(HostError::missing_option(DRIVER_NAME, option));
            }
        }
        if !self.nova_network && self.floating_ip_network.is_empty() {
            return Err(HostError::missing_option(DRIVER_NAME, "openstack-floating-net"));
        }
        Ok(())
    }

    fn set_machine_name_if_not_set(&mut self) {
        if self.machine_name.is_empty() {
            self.machine_name = provision::generate_machine_name();
        }
    }

    async fn wait_for_active(&self, session: &Session) -> Result<(), HostError> {
        tracing::info!("Waiting for instance {} to become active", self.machine_name);
        let id = self.machine_id.as_str();
        poll_until(&format!("instance {id} to become ACTIVE"), SERVER_ACTIVE, |_| async move {
            match session.get_server(id).await {
                Ok(server) if server.status == "ACTIVE" => Some(Ok(())),
                Ok(server) if server.status == "ERROR" => Some(Err(HostError::backend(
                    DRIVER_NAME,
                    "create server",
                    id,
                    "instance entered ERROR state",
                ))),
                Ok(server) => {
                    tracing::debug!("Instance {} is {}", id, server.status);
                    None
                }
                Err(e) => {
                    tracing::debug!("Instance {} not ready: {}", id, e);
                    None
                }
            }
        })
        .await?
    }

    async fn assign_floating_ip(&self, session: &Session) -> Result<FloatingIp, HostError> {
        if self.nova_network {
            let ip = session.allocate_nova_ip(&self.floating_ip_network).await?;
            session.associate_nova_ip(&self.machine_id, &ip.address).await?;
            return Ok(ip);
        }

        let network_id = session.network_id(&self.floating_ip_network).await?;
        let port_id = if self.floating_ip_port.is_empty() {
            session.server_port(&self.machine_id).await?
        } else {
            self.floating_ip_port.clone()
        };
        session.create_floating_ip(&network_id, &port_id).await
    }

    async fn release_floating_ip(&self, session: &Session) {
        if self.floating_ip_id.is_empty() {
            return;
        }
        let result = if self.nova_network {
            session.release_nova_ip(&self.floating_ip_id).await
        } else {
            session.delete_floating_ip(&self.floating_ip_id).await
        };
        match result {
            Ok(()) | Err(HostError::NotFound(_)) => {}
            Err(e) => tracing::warn!("Failed to release floating IP {}: {}", self.ip_address, e),
        }
    }

    async fn action(&self, action: Value, operation: &str) -> Result<(), HostError> {
        self.session()
            .await?
            .server_action(&self.machine_id, &action, operation)
            .await
    }
}

#[async_trait]
impl Driver for OpenstackDriver {
    fn driver_name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn configure_from_options(&mut self, options: &DriverOptions) -> Result<(), HostError> {
        let options = &options.over_defaults(&create_flags());
        for option in REQUIRED {
            options.require(DRIVER_NAME, option)?;
        }

        self.set_machine_name_if_not_set();
        self.identity_endpoint = options.string("openstack-auth-endpoint");
        self.username = options.string("openstack-username");
        self.password = options.string("openstack-password");
        self.tenant_id = options.string("openstack-tenant-id");
        self.region = options.string("openstack-region");
        self.image_id = options.string("openstack-image-id");
        self.flavor = options.string("openstack-flavor");
        self.keypair = options.string("openstack-keypair");
        self.floating_ip_network = options.string("openstack-floating-net");
        self.floating_ip_port = options.string("openstack-floating-port");
        self.security_group = options.string("openstack-security-group");
        self.nova_network = options.bool("openstack-nova-net")?;
        self.ssh_user = options.string("openstack-ssh-user");
        self.docker_port = options.number("openstack-docker-port")?;

        if !self.nova_network {
            options.require(DRIVER_NAME, "openstack-floating-net")?;
        }
        if self.docker_port == 0 {
            return Err(HostError::InvalidOption {
                option: "openstack-docker-port".to_string(),
                reason: "must be a valid TCP port".to_string(),
            });
        }
        Ok(())
    }

    async fn create(&mut self) -> Result<(), HostError> {
        self.set_machine_name_if_not_set();
        self.check_config()?;

        let session = self.session().await?;

        tracing::info!("Generating SSH keypair...");
        ssh::generate_ssh_key(&*self.runner, &self.key_path()).await?;
        let public_key = ssh::read_public_key(&ssh::public_key_path(&self.store_path))?;

        let flavors = session.list_flavors().await?;
        let flavor = client::resolve_flavor(&flavors, &self.flavor).ok_or_else(|| HostError::InvalidOption {
            option: "openstack-flavor".to_string(),
            reason: format!("no flavor named {:?}", self.flavor),
        })?;

        let user_data = userdata::encode_user_data(&userdata::cloud_config(
            &public_key,
            &self.ssh_user,
            self.docker_port,
        ));
        let body = client::server_body(
            &self.machine_name,
            &self.image_id,
            &flavor,
            &user_data,
            &self.keypair,
            &self.security_group,
        );

        tracing::info!("Creating OpenStack instance {}", self.machine_name);
        let server = session.create_server(&body, &self.machine_name).await?;
        self.machine_id = server.id;
        tracing::debug!("Instance {} has id {}", self.machine_name, self.machine_id);

        self.wait_for_active(&session).await?;

        tracing::info!("Assigning a floating IP to {}", self.machine_name);
        let ip = self.assign_floating_ip(&session).await?;
        self.floating_ip_id = ip.id;
        self.ip_address = ip.address;

        if !self.security_group.is_empty() {
            session
                .open_ports(&self.security_group, self.docker_port, self.nova_network)
                .await?;
        }

        provision::wait_for_tcp(&dial_target(&self.ip_address, SSH_PORT), SSH_READY).await?;
        provision::wait_for_tcp(&dial_target(&self.ip_address, self.docker_port), ENGINE_READY).await?;
        Ok(())
    }

    async fn start(&self) -> Result<(), HostError> {
        if self.get_state().await? == MachineState::Running {
            tracing::info!("Instance {} is already running", self.machine_name);
            return Ok(());
        }
        self.action(json!({ "os-start": null }), "start").await
    }

    async fn stop(&self) -> Result<(), HostError> {
        if self.get_state().await? == MachineState::Stopped {
            tracing::info!("Instance {} is already stopped", self.machine_name);
            return Ok(());
        }
        self.action(json!({ "os-stop": null }), "stop").await
    }

    async fn restart(&self) -> Result<(), HostError> {
        if self.get_state().await? != MachineState::Running {
            return self.start().await;
        }
        self.action(json!({ "reboot": { "type": "SOFT" } }), "restart").await
    }

    async fn kill(&self) -> Result<(), HostError> {
        self.stop().await
    }

    async fn remove(&self) -> Result<(), HostError> {
        if self.machine_id.is_empty() {
            tracing::info!("Instance {} was never created", self.machine_name);
            return Ok(());
        }

        let session = self.session().await?;
        match session.delete_server(&self.machine_id).await {
            Ok(()) => {}
            Err(HostError::NotFound(_)) => {
                tracing::info!("Instance {} no longer exists", self.machine_name);
            }
            Err(e) => return Err(e),
        }
        self.release_floating_ip(&session).await;
        Ok(())
    }

    async fn upgrade(&self) -> Result<(), HostError> {
        Err(HostError::unsupported(DRIVER_NAME, "upgrade"))
    }

    async fn get_state(&self) -> Result<MachineState, HostError> {
        if self.machine_id.is_empty() {
            return Ok(MachineState::None);
        }
        let server = self.session().await?.get_server(&self.machine_id).await?;
        Ok(server_state(&server.status))
    }

    async fn get_ip(&self) -> Result<String, HostError> {
        if self.ip_address.is_empty() {
            return Err(HostError::backend(
                DRIVER_NAME,
                "get ip",
                &self.machine_name,
                "no floating IP assigned",
            ));
        }
        Ok(self.ip_address.clone())
    }

    async fn get_url(&self) -> Result<String, HostError> {
        let ip = self.get_ip().await?;
        Ok(tcp_url(&ip, self.docker_port))
    }

    async fn get_ssh_command(&self, args: &[String]) -> Result<Command, HostError> {
        super::ensure_not_stopped(self, &self.machine_name).await?;
        let ip = self.get_ip().await?;
        Ok(ssh::ssh_command(&ip, SSH_PORT, &self.ssh_user, &self.key_path(), args))
    }

    fn save_config(&self) -> Result<Value, HostError> {
        Ok(serde_json::to_value(self)?)
    }

    fn load_config(&mut self, config: Value) -> Result<(), HostError> {
        let mut loaded: OpenstackDriver = serde_json::from_value(config)?;
        loaded.store_path = std::mem::take(&mut self.store_path);
        loaded.runner = self.runner.clone();
        *self = loaded;
        Ok(())
    }
}

/// Reduce a Nova server status onto a machine state
fn server_state(status: &str) -> MachineState {
    match status {
        "ACTIVE" => MachineState::Running,
        "BUILD" | "REBUILD" | "REBOOT" | "HARD_REBOOT" | "MIGRATING" => MachineState::Starting,
        "SHUTOFF" | "STOPPED" | "SUSPENDED" | "PAUSED" | "SHELVED" | "SHELVED_OFFLOADED" => {
            MachineState::Stopped
        }
        _ => MachineState::None,
    }
}
