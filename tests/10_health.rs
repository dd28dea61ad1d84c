mod common;

use anyhow::Result;
use reqwest::StatusCode;

#[tokio::test]
async fn root_is_public() -> Result<()> {
    let server = common::ensure_server().await?;
    let (status, body) = common::body(reqwest::get(server.url("/")).await?).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["name"], "tenant-gate");
    Ok(())
}

#[tokio::test]
async fn health_reports_database() -> Result<()> {
    let server = common::ensure_server().await?;
    let res = reqwest::get(server.url("/health")).await?;

    assert!(res.headers().contains_key("x-request-id"), "request id not propagated");
    let (status, body) = common::body(res).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["database"], "up");
    Ok(())
}
