//! Record service runner
//!
//! Connects to NATS, provisions the notification stream and pointer
//! bucket, seeds the sentinel rows, and runs one record service per
//! configured pipeline until the streams end.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use ami_publication::{
    seed_pointers, ChannelConfig, KvPointerStore, NotificationChannel, PublicationConfig,
    RecordHandler, RecordService,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = PublicationConfig::from_env().unwrap_or_default();
    info!(
        application = %config.application,
        region = %config.region,
        "Starting record service"
    );

    let channel = NotificationChannel::connect(ChannelConfig::default()).await?;
    channel.ensure_stream().await?;

    let store = Arc::new(
        KvPointerStore::open(channel.context(), "ami-pointers", config.application.clone())
            .await?,
    );
    seed_pointers(store.as_ref(), &config).await?;

    let mut tasks = Vec::new();
    for pipeline in &config.pipelines {
        let handler = Arc::new(RecordHandler::new(Arc::clone(&store), pipeline.clone()));
        let service = RecordService::new(channel.clone(), handler);
        tasks.push(service.run().await?);
    }

    for task in tasks {
        task.await?;
    }
    Ok(())
}
