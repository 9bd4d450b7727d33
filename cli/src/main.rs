//! Standalone RTSP server binary.
//!
//! Wires [`camstream_rtsp::Server`] to a capture directory where an external
//! encoder writes growing length-prefixed-NAL MP4 fragments (§1, §4.4 of the
//! design). The encoder is treated purely as a byte source: this binary does
//! not know how the capture device or encoder works, only the file-system
//! contract it leaves behind.
//!
//! ## Capture directory contract
//!
//! - `<dir>/header.mp4` — a short-lived finished fragment the encoder writes
//!   once at startup so its `moov` is complete; used only to scrape `avcC`
//!   (the "header file dance", §4.4).
//! - `<dir>/stream0.mp4`, `<dir>/stream1.mp4`, ... — the live, growing
//!   fragment, tailed and rotated round-robin once it exceeds the
//!   configured threshold.

use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;

use camstream_rtsp::h264::{AvcC, SeqParamSet};
use camstream_rtsp::mp4::{find_avcc, FrameExtractor};
use camstream_rtsp::{BasicAuth, Server, ServerConfig};

#[derive(Parser)]
#[command(name = "camstream-server", about = "Standalone RTSP server for a local H.264/AAC capture device")]
struct Args {
    /// Bind address (host:port) for the RTSP TCP listener.
    #[arg(long, short, default_value = "0.0.0.0:554")]
    bind: String,

    /// Directory where the encoder writes `header.mp4` and `streamN.mp4`.
    #[arg(long)]
    capture_dir: PathBuf,

    /// Device name advertised in the SDP `s=` line.
    #[arg(long, default_value = "Camera")]
    device_name: String,

    /// Optional Basic-Auth username (requires --password too).
    #[arg(long)]
    username: Option<String>,

    /// Optional Basic-Auth password.
    #[arg(long)]
    password: Option<String>,

    /// File-rotation threshold in bytes.
    #[arg(long, default_value_t = camstream_rtsp::server::DEFAULT_ROTATION_THRESHOLD_BYTES)]
    rotation_threshold_bytes: u64,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut config = ServerConfig::new(args.device_name).with_rotation_threshold_bytes(args.rotation_threshold_bytes);
    if let (Some(user), Some(pass)) = (args.username, args.password) {
        config = config.with_auth(BasicAuth::new(user, pass));
    }

    let mut server = Server::new(&args.bind, config);
    if let Err(e) = server.start() {
        eprintln!("failed to start server: {e}");
        return;
    }
    tracing::info!(addr = %args.bind, "RTSP server started, press Enter to stop");

    let capture_dir = args.capture_dir.clone();
    let server_config = server.config();
    let running = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
    let capture_running = running.clone();
    let capture_thread = thread::spawn(move || {
        if let Err(e) = run_capture_loop(&capture_dir, server_config, &server, capture_running) {
            tracing::error!(error = %e, "capture loop exited");
        }
    });

    let mut input = String::new();
    io::stdin().read_line(&mut input).ok();

    running.store(false, std::sync::atomic::Ordering::SeqCst);
    capture_thread.join().ok();
}

/// Wait for `header.mp4`, scrape `avcC`/SPS from its finished `moov`, publish
/// the stream config, then tail `stream0.mp4` (rotating round-robin),
/// delivering access units to every playing session.
fn run_capture_loop(
    capture_dir: &Path,
    server_config: std::sync::Arc<ServerConfig>,
    server: &Server,
    running: std::sync::Arc<std::sync::atomic::AtomicBool>,
) -> camstream_rtsp::Result<()> {
    let header_path = capture_dir.join("header.mp4");
    while running.load(std::sync::atomic::Ordering::SeqCst) && !header_path.exists() {
        thread::sleep(Duration::from_millis(200));
    }
    if !running.load(std::sync::atomic::Ordering::SeqCst) {
        return Ok(());
    }

    let mut header_file = std::fs::File::open(&header_path)?;
    let file_len = header_file.metadata()?.len();
    let avcc_bytes = find_avcc(&mut header_file, file_len)?;
    let avcc = AvcC::parse(&avcc_bytes)?;
    let sps = SeqParamSet::decode(&avcc.sps)?;

    server_config.publish_stream_config(avcc.clone(), sps.width, sps.height, 2_000_000, None);
    std::fs::remove_file(&header_path).ok();
    tracing::info!(width = sps.width, height = sps.height, "stream config published");

    let mut stream_index = 0u32;
    let mut extractor = FrameExtractor::open(capture_dir.join("stream0.mp4"), avcc.length_size)?
        .with_rotation_threshold(server_config.rotation_threshold_bytes);
    extractor.set_sps(sps);

    let capture_start = Instant::now();
    let mut bitrate_logged_at = Instant::now();

    while running.load(std::sync::atomic::Ordering::SeqCst) {
        extractor.push_timestamp(capture_start.elapsed().as_secs_f64());

        let mut delivered: Vec<(Vec<Vec<u8>>, f64)> = Vec::new();
        extractor.pump(&mut |au, pts| delivered.push((au, pts)))?;
        for (au, pts) in delivered {
            server.broadcast_video(&au, pts);
        }

        if extractor.should_rotate()? {
            stream_index = (stream_index + 1) % server_config.max_file_index.max(1);
            let next_path = capture_dir.join(format!("stream{stream_index}.mp4"));
            let mut delivered: Vec<(Vec<Vec<u8>>, f64)> = Vec::new();
            extractor.rotate_to(&next_path, &mut |au, pts| delivered.push((au, pts)))?;
            for (au, pts) in delivered {
                server.broadcast_video(&au, pts);
            }
        }

        if bitrate_logged_at.elapsed() >= Duration::from_secs(5) {
            server_config.update_bitrate(extractor.bits_per_second() as u32);
            bitrate_logged_at = Instant::now();
        }

        thread::sleep(Duration::from_millis(40));
    }

    Ok(())
}
