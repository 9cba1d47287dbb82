use std::path::PathBuf;

use clap::Parser;

/// Connect to a Bilibili live room and print its chat as JSON lines.
#[derive(Parser, Debug)]
#[command(name = "livechat", version, about, long_about = None)]
pub struct Args {
    /// Real room id (not a short alias)
    pub room_id: u64,

    /// Configuration file (TOML)
    #[arg(short, long, env = "LIVECHAT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Base URL of the platform API used to look up the chat server
    #[arg(long, value_name = "URL")]
    pub api_base: Option<String>,

    /// Connect to this chat server directly, skipping the API lookup
    #[arg(long, value_name = "WSS_URL", requires = "token")]
    pub url: Option<String>,

    /// Auth token for --url
    #[arg(long, requires = "url")]
    pub token: Option<String>,

    /// Pretty-print each item
    #[arg(long)]
    pub pretty: bool,

    /// Also log session events (state changes, popularity)
    #[arg(long)]
    pub events: bool,

    /// Enable debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,
}
