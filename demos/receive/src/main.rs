// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Receives video from a camera and writes it to a raw `.h264` file.
//!
//! Play the result with eg `ffplay -f h264 out.h264`.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{anyhow, Error};
use camstream::codec::{VideoFrame, START_CODE};
use camstream::{SessionOptions, VideoStream};
use clap::Parser;
use futures::StreamExt;
use log::{error, info, warn};
use tokio::io::AsyncWriteExt;

#[derive(Parser)]
struct Opts {
    /// Local address to listen on for the camera's announcement.
    #[clap(long, default_value = "0.0.0.0:3102")]
    bind: SocketAddr,

    /// Address to send requests and acknowledgements to, if not the announcement's source.
    #[clap(long)]
    peer: Option<SocketAddr>,

    /// Reassembly buffer size in bytes; must hold the largest frame.
    #[clap(long, default_value_t = 50 * 1024)]
    buffer_capacity: usize,

    /// Stop after this many frames.
    #[clap(long)]
    frames: Option<u64>,

    /// Path of the Annex B file to write.
    out: PathBuf,
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("CAMSTREAM_LOG", "info"))
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();
    if let Err(e) = main_inner().await {
        error!("Fatal: {}", itertools::join(e.chain(), "\ncaused by: "));
        std::process::exit(1);
    }
    info!("Done");
}

/// Writes `frame` in Annex B form, preceded by its parameter sets if it's a key frame.
async fn write_frame(out: &mut tokio::fs::File, frame: &VideoFrame) -> Result<(), Error> {
    if frame.is_random_access_point || frame.new_parameters {
        let p = frame.parameters();
        for nal in [p.sps(), p.pps()] {
            out.write_all(&START_CODE).await?;
            out.write_all(nal).await?;
        }
    }
    let slice = frame
        .data()
        .get(START_CODE.len()..)
        .ok_or_else(|| anyhow!("frame shorter than its length prefix"))?;
    out.write_all(&START_CODE).await?;
    out.write_all(slice).await?;
    Ok(())
}

async fn main_inner() -> Result<(), Error> {
    let opts = Opts::parse();
    let stop = tokio::signal::ctrl_c();
    let mut stream = VideoStream::bind(
        SessionOptions::default()
            .bind_addr(opts.bind)
            .peer(opts.peer)
            .buffer_capacity(opts.buffer_capacity),
    )
    .await?;
    info!("listening on {}", stream.local_addr());
    let mut out = tokio::fs::File::create(&opts.out).await?;
    let mut written = 0u64;
    let mut waiting_for_key_frame = true;

    tokio::pin!(stop);
    loop {
        tokio::select! {
            item = stream.next() => {
                let frame = match item.ok_or_else(|| anyhow!("EOF"))? {
                    Ok(f) => f,
                    Err(e) => {
                        warn!("{}", e);
                        continue;
                    }
                };
                if waiting_for_key_frame && !frame.is_random_access_point {
                    continue;
                }
                if waiting_for_key_frame {
                    let p = frame.parameters();
                    info!(
                        "first key frame: {} {}x{}",
                        p.rfc6381_codec(),
                        p.pixel_dimensions().0,
                        p.pixel_dimensions().1
                    );
                    waiting_for_key_frame = false;
                }
                write_frame(&mut out, &frame).await?;
                written += 1;
                if opts.frames.map_or(false, |max| written >= max) {
                    break;
                }
            },
            _ = &mut stop => {
                break;
            },
        }
    }
    out.flush().await?;
    info!("wrote {} frames to {}", written, opts.out.display());
    Ok(())
}
