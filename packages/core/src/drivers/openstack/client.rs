//! Minimal Keystone v2 / Nova / Neutron client

use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::HostError;

const BACKEND: &str = "openstack";

/// Credentials and scope for a Keystone v2 token
#[derive(Debug, Clone)]
pub struct AuthOptions {
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub tenant_id: String,
    pub region: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access: Access,
}

#[derive(Debug, Deserialize)]
struct Access {
    token: Token,
    #[serde(rename = "serviceCatalog", default)]
    service_catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct Token {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEndpoint {
    #[serde(default)]
    pub region: String,
    #[serde(rename = "publicURL")]
    pub public_url: String,
}

/// Public URL of a service type in a region
///
/// An endpoint without a region matches any region.
pub fn endpoint_for(catalog: &[CatalogEntry], kind: &str, region: &str) -> Option<String> {
    catalog
        .iter()
        .filter(|entry| entry.kind == kind)
        .flat_map(|entry| entry.endpoints.iter())
        .find(|ep| ep.region == region || ep.region.is_empty())
        .map(|ep| ep.public_url.trim_end_matches('/').to_string())
}

/// Subset of a Nova server record
#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub id: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Flavor {
    pub id: String,
    pub name: String,
}

/// Flavor id for a name or id
pub fn resolve_flavor(flavors: &[Flavor], wanted: &str) -> Option<String> {
    flavors
        .iter()
        .find(|f| f.id == wanted)
        .or_else(|| flavors.iter().find(|f| f.name == wanted))
        .map(|f| f.id.clone())
}

/// Allocated floating address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloatingIp {
    pub id: String,
    pub address: String,
}

/// Request body for `POST /servers`
pub fn server_body(
    name: &str,
    image: &str,
    flavor: &str,
    user_data: &str,
    key_name: &str,
    security_group: &str,
) -> Value {
    let mut server = json!({
        "name": name,
        "imageRef": image,
        "flavorRef": flavor,
        "user_data": user_data,
    });
    if !key_name.is_empty() {
        server["key_name"] = json!(key_name);
    }
    if !security_group.is_empty() {
        server["security_groups"] = json!([{ "name": security_group }]);
    }
    json!({ "server": server })
}

/// Ingress rules opened on the security group: SSH, the engine port and ICMP
pub fn ingress_rules(engine_port: u16) -> Vec<(&'static str, i32, i32)> {
    vec![("tcp", 22, 22), ("tcp", engine_port as i32, engine_port as i32), ("icmp", -1, -1)]
}

/// Authenticated session scoped to one tenant and region
pub struct Session {
    http: reqwest::Client,
    token: String,
    compute: String,
    network: Option<String>,
}

impl Session {
    pub async fn authenticate(opts: &AuthOptions) -> Result<Self, HostError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| HostError::backend(BACKEND, "authenticate", &opts.endpoint, e.to_string()))?;

        let body = json!({
            "auth": {
                "passwordCredentials": {
                    "username": opts.username,
                    "password": opts.password,
                },
                "tenantId": opts.tenant_id,
            }
        });
        let url = format!("{}/tokens", opts.endpoint.trim_end_matches('/'));
        tracing::debug!("Authenticating against {}", url);

        let response = http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| HostError::backend(BACKEND, "authenticate", &opts.endpoint, e.to_string()))?;
        let value = read_response(response, "authenticate", &opts.username).await?;
        let token: TokenResponse = serde_json::from_value(value)?;

        let compute = endpoint_for(&token.access.service_catalog, "compute", &opts.region)
            .ok_or_else(|| {
                HostError::backend(
                    BACKEND,
                    "authenticate",
                    &opts.region,
                    "no compute endpoint in service catalog",
                )
            })?;
        let network = endpoint_for(&token.access.service_catalog, "network", &opts.region);

        Ok(Self {
            http,
            token: token.access.token.id,
            compute,
            network,
        })
    }

    async fn call(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        operation: &str,
        resource: &str,
    ) -> Result<Value, HostError> {
        tracing::debug!("{} {}", method, url);
        let mut request = self
            .http
            .request(method, url)
            .header("X-Auth-Token", &self.token)
            .header("Accept", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| HostError::backend(BACKEND, operation, resource, e.to_string()))?;
        read_response(response, operation, resource).await
    }

    fn network_url(&self, path: &str, operation: &str) -> Result<String, HostError> {
        let base = self.network.as_deref().ok_or_else(|| {
            HostError::backend(BACKEND, operation, "network", "no network endpoint in service catalog")
        })?;
        Ok(format!("{base}/v2.0/{path}"))
    }

    pub async fn list_flavors(&self) -> Result<Vec<Flavor>, HostError> {
        let url = format!("{}/flavors", self.compute);
        let value = self.call(Method::GET, &url, None, "list flavors", "flavors").await?;
        field(value, "flavors")
    }

    pub async fn create_server(&self, body: &Value, name: &str) -> Result<Server, HostError> {
        let url = format!("{}/servers", self.compute);
        let value = self.call(Method::POST, &url, Some(body), "create server", name).await?;
        field(value, "server")
    }

    pub async fn get_server(&self, id: &str) -> Result<Server, HostError> {
        let url = format!("{}/servers/{id}", self.compute);
        let value = self.call(Method::GET, &url, None, "get server", id).await?;
        field(value, "server")
    }

    pub async fn server_action(&self, id: &str, action: &Value, operation: &str) -> Result<(), HostError> {
        let url = format!("{}/servers/{id}/action", self.compute);
        self.call(Method::POST, &url, Some(action), operation, id).await?;
        Ok(())
    }

    pub async fn delete_server(&self, id: &str) -> Result<(), HostError> {
        let url = format!("{}/servers/{id}", self.compute);
        self.call(Method::DELETE, &url, None, "delete server", id).await?;
        Ok(())
    }

    /// Network id for a name, falling back to treating the input as an id
    pub async fn network_id(&self, name_or_id: &str) -> Result<String, HostError> {
        let url = self.network_url(&format!("networks?name={name_or_id}"), "find network")?;
        let value = self.call(Method::GET, &url, None, "find network", name_or_id).await?;
        let networks: Vec<IdOnly> = field(value, "networks")?;
        Ok(networks
            .into_iter()
            .next()
            .map(|n| n.id)
            .unwrap_or_else(|| name_or_id.to_string()))
    }

    /// First Neutron port attached to a server
    pub async fn server_port(&self, server_id: &str) -> Result<String, HostError> {
        let url = self.network_url(&format!("ports?device_id={server_id}"), "find port")?;
        let value = self.call(Method::GET, &url, None, "find port", server_id).await?;
        let ports: Vec<IdOnly> = field(value, "ports")?;
        ports
            .into_iter()
            .next()
            .map(|p| p.id)
            .ok_or_else(|| HostError::backend(BACKEND, "find port", server_id, "server has no network port"))
    }

    pub async fn create_floating_ip(&self, network_id: &str, port_id: &str) -> Result<FloatingIp, HostError> {
        let url = self.network_url("floatingips", "create floating IP")?;
        let body = json!({
            "floatingip": {
                "floating_network_id": network_id,
                "port_id": port_id,
            }
        });
        let value = self
            .call(Method::POST, &url, Some(&body), "create floating IP", port_id)
            .await?;
        let ip: NeutronFloatingIp = field(value, "floatingip")?;
        Ok(FloatingIp {
            id: ip.id,
            address: ip.floating_ip_address,
        })
    }

    pub async fn delete_floating_ip(&self, id: &str) -> Result<(), HostError> {
        let url = self.network_url(&format!("floatingips/{id}"), "delete floating IP")?;
        self.call(Method::DELETE, &url, None, "delete floating IP", id).await?;
        Ok(())
    }

    /// Allocate a nova-network floating address from a pool
    pub async fn allocate_nova_ip(&self, pool: &str) -> Result<FloatingIp, HostError> {
        let url = format!("{}/os-floating-ips", self.compute);
        let body = json!({ "pool": pool });
        let value = self
            .call(Method::POST, &url, Some(&body), "allocate floating IP", pool)
            .await?;
        let ip: NovaFloatingIp = field(value, "floating_ip")?;
        Ok(FloatingIp {
            id: value_id(&ip.id),
            address: ip.ip,
        })
    }

    pub async fn associate_nova_ip(&self, server_id: &str, address: &str) -> Result<(), HostError> {
        let action = json!({ "addFloatingIp": { "address": address } });
        self.server_action(server_id, &action, "associate floating IP").await
    }

    pub async fn release_nova_ip(&self, id: &str) -> Result<(), HostError> {
        let url = format!("{}/os-floating-ips/{id}", self.compute);
        self.call(Method::DELETE, &url, None, "release floating IP", id).await?;
        Ok(())
    }

    /// Open ingress rules, ignoring ones that already exist
    pub async fn open_ports(&self, group: &str, engine_port: u16, nova_network: bool) -> Result<(), HostError> {
        let result = if nova_network {
            self.open_nova_ports(group, engine_port).await
        } else {
            self.open_neutron_ports(group, engine_port).await
        };
        match result {
            Err(HostError::AlreadyExists(_)) => Ok(()),
            other => other,
        }
    }

    async fn open_neutron_ports(&self, group: &str, engine_port: u16) -> Result<(), HostError> {
        let url = self.network_url(&format!("security-groups?name={group}"), "find security group")?;
        let value = self.call(Method::GET, &url, None, "find security group", group).await?;
        let groups: Vec<IdOnly> = field(value, "security_groups")?;
        let group_id = groups
            .into_iter()
            .next()
            .map(|g| g.id)
            .ok_or_else(|| HostError::NotFound(group.to_string()))?;

        let url = self.network_url("security-group-rules", "add security group rule")?;
        for (protocol, min, max) in ingress_rules(engine_port) {
            let mut rule = json!({
                "direction": "ingress",
                "ethertype": "IPv4",
                "protocol": protocol,
                "security_group_id": group_id,
            });
            if min >= 0 {
                rule["port_range_min"] = json!(min);
                rule["port_range_max"] = json!(max);
            }
            let body = json!({ "security_group_rule": rule });
            ignore_conflict(
                self.call(Method::POST, &url, Some(&body), "add security group rule", group)
                    .await,
            )?;
        }
        Ok(())
    }

    async fn open_nova_ports(&self, group: &str, engine_port: u16) -> Result<(), HostError> {
        let url = format!("{}/os-security-groups", self.compute);
        let value = self.call(Method::GET, &url, None, "find security group", group).await?;
        let groups: Vec<NovaSecurityGroup> = field(value, "security_groups")?;
        let group_id = groups
            .into_iter()
            .find(|g| g.name == group)
            .map(|g| g.id)
            .ok_or_else(|| HostError::NotFound(group.to_string()))?;

        let url = format!("{}/os-security-group-rules", self.compute);
        for (protocol, min, max) in ingress_rules(engine_port) {
            let body = json!({
                "security_group_rule": {
                    "parent_group_id": group_id,
                    "ip_protocol": protocol,
                    "from_port": min,
                    "to_port": max,
                    "cidr": "0.0.0.0/0",
                }
            });
            ignore_conflict(
                self.call(Method::POST, &url, Some(&body), "add security group rule", group)
                    .await,
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
struct NeutronFloatingIp {
    id: String,
    floating_ip_address: String,
}

#[derive(Debug, Deserialize)]
struct NovaFloatingIp {
    id: Value,
    ip: String,
}

#[derive(Debug, Deserialize)]
struct NovaSecurityGroup {
    id: Value,
    name: String,
}

/// Nova-network ids are integers on older clouds and strings on newer ones
fn value_id(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn ignore_conflict(result: Result<Value, HostError>) -> Result<(), HostError> {
    match result {
        Ok(_) | Err(HostError::AlreadyExists(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Decode one top-level field of a response document
fn field<T: DeserializeOwned>(mut value: Value, name: &str) -> Result<T, HostError> {
    let inner = value
        .get_mut(name)
        .map(Value::take)
        .ok_or_else(|| HostError::backend(BACKEND, "decode response", name, "field missing from response"))?;
    Ok(serde_json::from_value(inner)?)
}

async fn read_response(response: reqwest::Response, operation: &str, resource: &str) -> Result<Value, HostError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| HostError::backend(BACKEND, operation, resource, e.to_string()))?;
    if !status.is_success() {
        return Err(status_error(status, &text, operation, resource));
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
}

/// Map an HTTP failure onto the error taxonomy
pub fn status_error(status: StatusCode, body: &str, operation: &str, resource: &str) -> HostError {
    match status {
        StatusCode::NOT_FOUND => HostError::NotFound(resource.to_string()),
        StatusCode::CONFLICT => HostError::AlreadyExists(resource.to_string()),
        _ => HostError::backend(BACKEND, operation, resource, format!("{status}: {}", body.trim())),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{TOKEN, auth, keystone};
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn session_sends_token_to_catalog_endpoint() {
        let server = MockServer::start().await;
        keystone(&server).await;
        Mock::given(method("GET"))
            .and(path("/compute/v2/t1/servers/s1"))
            .and(header("X-Auth-Token", TOKEN))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "server": { "id": "s1", "status": "BUILD" } })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let session = Session::authenticate(&auth(&server)).await.unwrap();
        let found = session.get_server("s1").await.unwrap();

        assert_eq!(found.id, "s1");
        assert_eq!(found.status, "BUILD");
    }

    #[tokio::test]
    async fn rejected_credentials_fail_authentication() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2.0/tokens"))
            .and(body_partial_json(json!({ "auth": { "tenantId": "t1" } })))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid credentials"))
            .expect(1)
            .mount(&server)
            .await;

        let Err(err) = Session::authenticate(&auth(&server)).await else {
            panic!("authentication should fail");
        };
        match err {
            HostError::BackendOperationFailed { operation, message, .. } => {
                assert_eq!(operation, "authenticate");
                assert!(message.contains("401"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn catalog_without_region_compute_is_rejected() {
        let server = MockServer::start().await;
        keystone(&server).await;
        let mut options = auth(&server);
        options.region = "RegionTwo".to_string();

        let Err(err) = Session::authenticate(&options).await else {
            panic!("RegionTwo has no compute endpoint");
        };
        assert!(err.to_string().contains("no compute endpoint"));
    }

    #[tokio::test]
    async fn existing_security_rules_are_ignored() {
        let server = MockServer::start().await;
        keystone(&server).await;
        Mock::given(method("GET"))
            .and(path("/network/v2.0/security-groups"))
            .and(query_param("name", "default"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "security_groups": [{ "id": "sg-1" }] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/network/v2.0/security-group-rules"))
            .and(body_partial_json(json!({ "security_group_rule": { "security_group_id": "sg-1" } })))
            .respond_with(ResponseTemplate::new(409).set_body_string("rule exists"))
            .expect(3)
            .mount(&server)
            .await;

        let session = Session::authenticate(&auth(&server)).await.unwrap();
        session.open_ports("default", 2375, false).await.unwrap();
    }

    #[tokio::test]
    async fn missing_security_group_is_not_found() {
        let server = MockServer::start().await;
        keystone(&server).await;
        Mock::given(method("GET"))
            .and(path("/compute/v2/t1/os-security-groups"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "security_groups": [{ "id": 7, "name": "web" }] })),
            )
            .mount(&server)
            .await;

        let session = Session::authenticate(&auth(&server)).await.unwrap();
        let err = session.open_ports("default", 2375, true).await.unwrap_err();
        assert!(matches!(err, HostError::NotFound(name) if name == "default"));
    }

    fn catalog() -> Vec<CatalogEntry> {
        serde_json::from_value(json!([
            {
                "type": "compute",
                "endpoints": [
                    { "region": "RegionTwo", "publicURL": "http://nova2:8774/v2/t1" },
                    { "region": "RegionOne", "publicURL": "http://nova1:8774/v2/t1/" }
                ]
            },
            {
                "type": "network",
                "endpoints": [{ "publicURL": "http://neutron:9696" }]
            }
        ]))
        .unwrap()
    }

    #[test]
    fn endpoint_selected_by_region() {
        let catalog = catalog();
        assert_eq!(
            endpoint_for(&catalog, "compute", "RegionOne").as_deref(),
            Some("http://nova1:8774/v2/t1")
        );
        assert_eq!(
            endpoint_for(&catalog, "compute", "RegionTwo").as_deref(),
            Some("http://nova2:8774/v2/t1")
        );
        assert_eq!(endpoint_for(&catalog, "compute", "RegionThree"), None);
    }

    #[test]
    fn regionless_endpoint_matches_any_region() {
        assert_eq!(
            endpoint_for(&catalog(), "network", "RegionOne").as_deref(),
            Some("http://neutron:9696")
        );
        assert_eq!(endpoint_for(&catalog(), "image", "RegionOne"), None);
    }

    #[test]
    fn flavor_resolves_by_id_before_name() {
        let flavors = vec![
            Flavor { id: "1".into(), name: "m1.tiny".into() },
            Flavor { id: "2".into(), name: "m1.small".into() },
            Flavor { id: "m1.tiny".into(), name: "odd".into() },
        ];
        assert_eq!(resolve_flavor(&flavors, "m1.small").as_deref(), Some("2"));
        assert_eq!(resolve_flavor(&flavors, "1").as_deref(), Some("1"));
        assert_eq!(resolve_flavor(&flavors, "m1.tiny").as_deref(), Some("m1.tiny"));
        assert_eq!(resolve_flavor(&flavors, "m1.huge"), None);
    }

    #[test]
    fn server_body_omits_empty_keypair_and_group() {
        let body = server_body("h1", "img", "2", "dXNlcg==", "", "");
        let server = &body["server"];
        assert_eq!(server["imageRef"], "img");
        assert_eq!(server["flavorRef"], "2");
        assert_eq!(server["user_data"], "dXNlcg==");
        assert!(server.get("key_name").is_none());
        assert!(server.get("security_groups").is_none());

        let body = server_body("h1", "img", "2", "", "mykey", "default");
        assert_eq!(body["server"]["key_name"], "mykey");
        assert_eq!(body["server"]["security_groups"][0]["name"], "default");
    }

    #[test]
    fn rules_cover_ssh_engine_and_icmp() {
        assert_eq!(
            ingress_rules(2376),
            vec![("tcp", 22, 22), ("tcp", 2376, 2376), ("icmp", -1, -1)]
        );
    }

    #[test]
    fn http_statuses_map_onto_error_taxonomy() {
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, "", "get server", "abc"),
            HostError::NotFound(id) if id == "abc"
        ));
        assert!(matches!(
            status_error(StatusCode::CONFLICT, "", "add rule", "default"),
            HostError::AlreadyExists(_)
        ));
        match status_error(StatusCode::FORBIDDEN, "quota exceeded\n", "create server", "h1") {
            HostError::BackendOperationFailed { operation, message, .. } => {
                assert_eq!(operation, "create server");
                assert!(message.contains("403"));
                assert!(message.ends_with("quota exceeded"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn conflicts_are_ignored() {
        assert!(ignore_conflict(Err(HostError::AlreadyExists("r".into()))).is_ok());
        assert!(ignore_conflict(Err(HostError::NotFound("r".into()))).is_err());
    }

    #[test]
    fn nova_ids_may_be_numbers() {
        assert_eq!(value_id(&json!(42)), "42");
        assert_eq!(value_id(&json!("a-b")), "a-b");
    }

    #[test]
    fn field_extracts_nested_document() {
        let server: Server = field(json!({ "server": { "id": "s1", "status": "BUILD" } }), "server").unwrap();
        assert_eq!(server.id, "s1");
        assert_eq!(server.status, "BUILD");
        assert!(field::<Server>(json!({}), "server").is_err());
    }
}
