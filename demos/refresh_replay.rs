//! Demonstrates a request that hits an expired bearer, gets renewed through the refresh
//! endpoint, and is replayed transparently against a local mock server.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use serde_json::Value;
use url::Url;
// self
use bearer_session::{
	auth::Credential,
	endpoint::ServiceEndpoints,
	pipeline::ApiClient,
	store::{CredentialStore, MemoryStore},
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let expired = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/v1/users/items").header("authorization", "Bearer stale");
			then.status(401);
		})
		.await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST).path(ServiceEndpoints::REFRESH_PATH);
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"accessToken\":\"fresh\",\"refreshToken\":\"rotated\"}");
		})
		.await;
	let items = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/v1/users/items").header("authorization", "Bearer fresh");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"items\":[{\"itemName\":\"umbrella\"}]}");
		})
		.await;
	let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::default());
	let client = ApiClient::new(ServiceEndpoints::from_base(Url::parse(&server.base_url())?)?, store)
		.with_redirect(|| println!("Session ended; the user must sign in again."));

	client.sign_in(Credential::new("stale").with_refresh_token("seed"))?;

	let body = client.get_json::<Value>("/api/v1/users/items").await?;

	println!("Items after one transparent refresh: {body}.");

	expired.assert_async().await;
	refresh.assert_async().await;
	items.assert_async().await;

	Ok(())
}
