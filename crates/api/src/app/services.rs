use std::sync::Arc;

use sessionflow_infra::config::SessionflowConfig;
use sessionflow_infra::dispatcher::AsyncDispatcher;
use sessionflow_infra::queue::JsonlQueue;

/// Durable JSONL queue behind a buffered dispatcher.
pub fn build_dispatcher(config: &SessionflowConfig) -> Arc<AsyncDispatcher> {
    let queue = JsonlQueue::new(&config.queue_path);
    Arc::new(AsyncDispatcher::spawn(queue, config.dispatcher_config()))
}
