//! Print the distance under the center of the color image for every frame.
//!
//! Run with:
//!   cargo run --example distance-monitor
//!
//! Then point a sender at port 9999, e.g.:
//!   cargo run -- stream --host 127.0.0.1 --frames 20

use std::ops::ControlFlow;

use depthlink::frame::{COLOR_HEIGHT, COLOR_WIDTH, DEPTH_HEIGHT, DEPTH_WIDTH};
use depthlink::peer::{FrameReceiver, ReceiverConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let receiver = FrameReceiver::bind("0.0.0.0:9999", ReceiverConfig::default())?;
    eprintln!("Listening on {}", receiver.local_addr());

    let mut session = receiver.accept()?;
    eprintln!("Sender connected: {}", session.peer_addr());

    let frames = session.run(|frame| {
        match frame.depth_map(DEPTH_WIDTH, DEPTH_HEIGHT) {
            Ok(depth) => {
                let center = depth.distance_at_color(
                    COLOR_WIDTH / 2,
                    COLOR_HEIGHT / 2,
                    COLOR_WIDTH,
                    COLOR_HEIGHT,
                );
                match center {
                    Some(meters) => println!("frame {}: {meters:.3} m", frame.sequence),
                    None => println!("frame {}: no reading", frame.sequence),
                }
            }
            Err(e) => eprintln!("frame {}: {e}", frame.sequence),
        }
        ControlFlow::Continue(())
    })?;

    eprintln!("Sender disconnected after {frames} frames");
    Ok(())
}
