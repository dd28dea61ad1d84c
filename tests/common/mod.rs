#![allow(dead_code)]

use std::process::{Child, Command, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::{RequestBuilder, StatusCode};
use serde_json::{json, Value};

pub const JWT_SECRET: &str = "integration-test-secret";
pub const TENANT_HEADER: &str = "x-tenant-id";

static SERVER: OnceLock<TestServer> = OnceLock::new();

pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    child: Child,
}

impl TestServer {
    fn spawn() -> Result<Self> {
        // Pick an unused port for isolation
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);

        // In-memory backend, development preset, known signing secret
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_tenant-gate"));
        cmd.env("APP_ENV", "development")
            .env("API_PORT", port.to_string())
            .env("SECURITY_JWT_SECRET", JWT_SECRET)
            .env("TENANT_ID_FORMAT", "any")
            .env("API_REQUEST_TIMEOUT_SECS", "5")
            .env_remove("DATABASE_URL")
            .env_remove("PORT")
            .arg("--bind")
            .arg("127.0.0.1")
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let child = cmd.spawn().context("failed to spawn server binary")?;

        Ok(Self { port, base_url, child })
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let client = reqwest::Client::new();
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() > deadline {
                break;
            }
            let url = format!("{}/health", self.base_url);
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status() == StatusCode::OK || resp.status() == StatusCode::SERVICE_UNAVAILABLE {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

pub async fn ensure_server() -> Result<&'static TestServer> {
    let server = SERVER.get_or_init(|| TestServer::spawn().expect("failed to spawn server binary"));
    server.wait_ready(Duration::from_secs(10)).await?;
    Ok(server)
}

/// A tenant id no other test uses
pub fn fresh_tenant() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Sign a token the server will accept
pub fn mint_token(tenant: Option<Value>, role: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let mut claims = json!({
        "sub": format!("user-{}", uuid::Uuid::new_v4()),
        "role": role,
        "iat": now,
        "exp": now + 600,
    });
    if let Some(tenant) = tenant {
        claims["tenant_id"] = tenant;
    }
    encode(&Header::default(), &claims, &EncodingKey::from_secret(JWT_SECRET.as_bytes()))
        .expect("failed to sign test token")
}

pub trait TenantRequest {
    fn as_tenant(self, tenant: &str, role: &str) -> Self;
    fn tenant_header(self, tenant: &str) -> Self;
}

impl TenantRequest for RequestBuilder {
    /// Authenticate with a token whose claim names `tenant`
    fn as_tenant(self, tenant: &str, role: &str) -> Self {
        self.bearer_auth(mint_token(Some(json!(tenant)), role))
    }

    fn tenant_header(self, tenant: &str) -> Self {
        self.header(TENANT_HEADER, tenant)
    }
}

pub async fn body(res: reqwest::Response) -> Result<(StatusCode, Value)> {
    let status = res.status();
    let body = res.json::<Value>().await?;
    Ok((status, body))
}
