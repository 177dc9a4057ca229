use std::time::Duration;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1:5000";
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_SEND_BUFFER: usize = 64;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub address: String,
    /// Period of the price/broadcast tick.
    pub tick_interval: Duration,
    /// Capacity of each connection's outbound queue.
    pub send_buffer: usize,
    /// Fixes the price walk for reproducible runs.
    pub rng_seed: Option<u64>,
    pub seed_demo_data: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            send_buffer: DEFAULT_SEND_BUFFER,
            rng_seed: None,
            seed_demo_data: true,
        }
    }
}
