//! RTP/RTCP delivery: header construction, codec packetization, transport
//! (UDP vs. RTSP-interleaved), and the per-stream session that ties them
//! together with Sender Report scheduling and Receiver Report demuxing.

pub mod header;
pub mod packetizer;
pub mod session;
pub mod transport;

pub use session::RtpSession;
pub use transport::RtpTransport;
