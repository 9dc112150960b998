//! Offline dissector for framed command captures.
//!
//! Runs the library's scanning codec over a captured byte stream (for
//! example a pcap payload export or a logged socket dump) and prints
//! every frame it can validate, resynchronizing past garbage exactly
//! like the live decoder would.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use bytes::BytesMut;
use clap::Parser;
use colored::Colorize;
use tokio_util::codec::Decoder;

use framelink::protocol::FrameCodec;

#[derive(Parser)]
#[command(name = "framelink-dissect", about = "Decode a captured framelink byte stream")]
struct Args {
    /// Capture file: raw bytes, or hex text with --hex.
    capture: PathBuf,

    /// Treat the capture as hex text (whitespace ignored).
    #[arg(long)]
    hex: bool,

    /// Print each frame's wire bytes as well.
    #[arg(long)]
    raw: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let data = fs::read(&args.capture)
        .with_context(|| format!("reading {}", args.capture.display()))?;
    let data = if args.hex {
        let text = String::from_utf8(data).context("hex capture is not UTF-8")?;
        let compact: String = text.split_whitespace().collect();
        hex::decode(compact).context("invalid hex in capture")?
    } else {
        data
    };

    let total = data.len();
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from(&data[..]);
    let mut count = 0usize;

    while let Some(cmd) = codec.decode(&mut buf)? {
        count += 1;
        let label = if cmd.is_heartbeat() {
            "heartbeat".yellow()
        } else {
            format!("{:#06x}", cmd.code).green()
        };
        println!("{count:>5}  {label}  args[{}] {:?}", cmd.args.len(), cmd.args);
        if args.raw {
            println!("       {}", hex::encode(framelink::protocol::encode(&cmd)));
        }
    }

    let undecoded = buf.len();
    println!(
        "{} frames decoded, {undecoded} of {total} bytes left undecoded",
        count.to_string().bold()
    );
    Ok(())
}
