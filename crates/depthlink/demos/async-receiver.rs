//! Accept senders on a tokio runtime and log frame sizes.
//!
//! Run with:
//!   cargo run --example async-receiver --features async

use depthlink::frame::FrameError;
use depthlink::peer::{AsyncFrameReceiver, PeerError, ReceiverConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let receiver = AsyncFrameReceiver::bind("0.0.0.0:9999", ReceiverConfig::default()).await?;
    eprintln!("Listening on {}", receiver.local_addr()?);

    loop {
        let mut session = receiver.accept().await?;
        let peer = session.peer_addr();
        eprintln!("Sender connected: {peer}");

        tokio::spawn(async move {
            loop {
                match session.recv_frame().await {
                    Ok(frame) => eprintln!(
                        "{peer} frame {}: color {} bytes, depth {} samples",
                        frame.sequence,
                        frame.color.len(),
                        frame.depth_samples()
                    ),
                    Err(PeerError::Frame(FrameError::ConnectionClosed)) => {
                        eprintln!("{peer} disconnected");
                        break;
                    }
                    Err(e) => {
                        eprintln!("{peer} error: {e}");
                        break;
                    }
                }
            }
        });
    }
}
