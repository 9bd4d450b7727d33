//! Network transport layer for RTSP signaling.
//!
//! - **TCP** ([`tcp`]): carries RTSP request/response signaling, and for
//!   clients that negotiate interleaved transport, RTP/RTCP frames
//!   multiplexed onto the same socket (RFC 2326 §10.12). One TCP
//!   connection per client, with a thread per connection.
//!
//! Outbound RTP/RTCP delivery for UDP-transport sessions is owned by
//! [`crate::rtp::RtpTransport`] instead of a shared transport-layer socket —
//! each session's SETUP binds its own server-side port pair.

pub mod tcp;
