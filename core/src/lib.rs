//! # rtsp — RTSP server library for live media streaming
//!
//! A Rust library for publishing live media streams (H.264, with H.265 and
//! MJPEG planned) over the Real-Time Streaming Protocol (RTSP).
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 2326](https://tools.ietf.org/html/rfc2326) | RTSP 1.0 | Request/response parsing, session lifecycle, transport negotiation |
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP | Packet header format, SSRC generation, sequence/timestamp semantics |
//! | [RFC 4566](https://tools.ietf.org/html/rfc4566) | SDP | Session description generation for DESCRIBE responses |
//! | [RFC 6184](https://tools.ietf.org/html/rfc6184) | H.264 RTP payload | NAL unit packetization, FU-A fragmentation, SDP fmtp attributes |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  Adapters (capture source / CLI)          │
//! ├──────────────────────────────────────────┤
//! │  Server        — public API, orchestrator│
//! │  Mp4           — avcC + access-unit feed │
//! ├──────────────────────────────────────────┤
//! │  Protocol      — RTSP parsing, SDP, etc. │
//! │  Session       — state machine, RtpSession│
//! ├──────────────────────────────────────────┤
//! │  Transport     — TCP signaling + interleave│
//! │  Rtp / Rtcp    — header, packetizer, SR/RR│
//! │  H264          — bitreader, SPS, POC, avcC│
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use camstream_rtsp::{Server, ServerConfig};
//!
//! let mut server = Server::new("0.0.0.0:554", ServerConfig::new("Front Door"));
//! server.start().unwrap();
//!
//! // Once the encoder's avcC/geometry are known, publish them so DESCRIBE
//! // can build SDP, then fan out access units as the extractor delivers them.
//! // server.config().publish_stream_config(avcc, 1920, 1080, 2_000_000, Some(44_100));
//! // server.broadcast_video(&nalus, pts);
//! ```
//!
//! ## Crate layout
//!
//! - [`server`] — High-level [`Server`] orchestrator and [`ServerConfig`].
//! - [`protocol`] — RTSP request/response parsing, connection state machine, SDP generation.
//! - [`session`] — RTSP session state machine and transport negotiation.
//! - [`transport`] — TCP listener for RTSP signaling and interleaved demuxing.
//! - [`rtp`] — RTP header, H.264/AAC packetizers, per-session delivery.
//! - [`rtcp`] — Compound RTCP (SR/RR/SDES/BYE) parsing and SR building.
//! - [`h264`] — Bitreader, SPS decoding, POC tracking, `avcC` parsing.
//! - [`mp4`] — Atom walking and the tailing frame extractor.
//! - [`error`] — [`RtspError`] enum and [`Result`] alias.

pub mod error;
pub mod h264;
pub mod mp4;
pub mod protocol;
pub mod rtcp;
pub mod rtp;
pub mod server;
pub mod session;
pub mod transport;

pub use error::{Result, RtspError};
pub use server::{BasicAuth, Server, ServerConfig, Viewer};
