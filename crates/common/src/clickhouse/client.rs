use anyhow::Result;
use clickhouse::Client;

/// Thin handle over the analytical store's HTTP client.
///
/// Constructed once at startup and cloned into every repository; the
/// underlying client is connectionless so clones are cheap.
#[derive(Clone)]
pub struct EventStoreClient {
    client: Client,
}

impl EventStoreClient {
    pub fn new(url: &str, database: &str, username: &str, password: &str) -> Self {
        let client = Client::default()
            .with_url(url)
            .with_database(database)
            .with_user(username)
            .with_password(password)
            .with_compression(clickhouse::Compression::Lz4);

        Self { client }
    }

    /// Startup reachability probe. A failure here aborts the process rather
    /// than letting a worker run degraded.
    pub async fn ping(&self) -> Result<()> {
        self.client.query("SELECT 1").fetch_one::<u8>().await?;
        Ok(())
    }

    pub fn get_client(&self) -> &Client {
        &self.client
    }
}
