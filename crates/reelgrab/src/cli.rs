use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "reelgrab")]
#[command(author, version, about = "Download videos from links with admission control, retries and compression", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Print outcomes as JSON lines instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Dump Prometheus metrics to stdout before exiting
    #[arg(long, global = true)]
    pub metrics: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download a single link
    Fetch {
        /// Link to a video page or a direct video file
        url: String,

        /// User the download is accounted to
        #[arg(short, long, default_value_t = 0)]
        user: i64,
    },

    /// Read `<user_id> <url>` lines from stdin and download them concurrently
    Batch,

    /// Delete stale files under the download folder
    Reap {
        /// Override STALE_FILE_MAX_AGE_HOURS
        #[arg(long)]
        max_age_hours: Option<u64>,
    },

    /// Report host resources and whether ffmpeg is usable
    Check,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Parses one batch line. Blank lines and `#` comments yield `None`.
pub fn parse_batch_line(line: &str) -> Option<Result<(i64, String), String>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let mut parts = line.split_whitespace();
    let (Some(user), Some(url), None) = (parts.next(), parts.next(), parts.next()) else {
        return Some(Err(format!("expected `<user_id> <url>`, got {:?}", line)));
    };
    Some(
        user.parse::<i64>()
            .map(|user| (user, url.to_string()))
            .map_err(|_| format!("invalid user id {:?}", user)),
    )
}
