//! CLI argument parsing.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "ai-proxy", version, about = "AI API proxy gateway")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.yaml", env = "AI_PROXY_CONFIG")]
    pub config: String,

    /// Listen host (overrides config)
    #[arg(long, env = "AI_PROXY_HOST")]
    pub host: Option<String>,

    /// Listen port (overrides config)
    #[arg(long, env = "AI_PROXY_PORT")]
    pub port: Option<u16>,

    /// Log level
    #[arg(long, default_value = "info", env = "AI_PROXY_LOG_LEVEL")]
    pub log_level: String,
}
