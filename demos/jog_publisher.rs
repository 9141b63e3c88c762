// Keyboard jog: WASD move in x/y, Z/X lower/raise, R/F step size, C calibrate here, Space stop, Q quit
//
// Publishes ControlRequest JSON on automic/cmd; the runtime must be running.
use automic_runtime::config::{RigConfig, TOPIC_CMD, TOPIC_REPLY};
use automic_runtime::messages::{ControlReply, ControlRequest, Position};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::Duration;
use tracing::{info, warn};

const STEPS: [f64; 3] = [0.1, 0.5, 1.0]; // feet per key press

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD).await?;
    let replies = session.declare_subscriber(TOPIC_REPLY).await?;

    // Show replies from the runtime
    tokio::spawn(async move {
        while let Ok(sample) = replies.recv_async().await {
            match serde_json::from_slice::<ControlReply>(&sample.payload().to_bytes()) {
                Ok(reply) => info!("{} -> {:?}: {}", reply.op, reply.status, reply.message),
                Err(e) => warn!("Unreadable reply: {}", e),
            }
        }
    });

    info!("Controls: WASD=x/y, Z/X=down/up, R/F=step, C=calibrate here, Space=stop, Q=quit");
    info!("Starting at the workspace centre; press C once the mic is really there");

    enable_raw_mode()?;
    let result = run_jog(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn run_jog(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let max = RigConfig::default().geometry.max;
    let mut target = max.map(|m| m / 2.0);
    let mut step_idx: usize = 0;

    loop {
        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(KeyEvent { code, kind, .. }) = event::read()? else {
            continue;
        };
        if kind != KeyEventKind::Press {
            continue;
        }

        let step = STEPS[step_idx];
        let (axis, delta) = match code {
            KeyCode::Char('w') => (1, step),
            KeyCode::Char('s') => (1, -step),
            KeyCode::Char('d') => (0, step),
            KeyCode::Char('a') => (0, -step),
            KeyCode::Char('x') => (2, step),
            KeyCode::Char('z') => (2, -step),

            KeyCode::Char('r') => {
                step_idx = (step_idx + 1).min(STEPS.len() - 1);
                info!("Step: {} ft", STEPS[step_idx]);
                continue;
            }
            KeyCode::Char('f') => {
                step_idx = step_idx.saturating_sub(1);
                info!("Step: {} ft", STEPS[step_idx]);
                continue;
            }
            KeyCode::Char('c') => {
                let request = ControlRequest::Calibrate(position(target));
                publisher.put(serde_json::to_string(&request)?).await?;
                continue;
            }
            KeyCode::Char(' ') => {
                publisher.put(serde_json::to_string(&ControlRequest::Stop)?).await?;
                continue;
            }

            // Quit
            KeyCode::Char('q') | KeyCode::Esc => break,

            _ => continue,
        };

        target[axis] = (target[axis] + delta).clamp(0.0, max[axis]);
        info!("Target: {:?}", target);
        let request = ControlRequest::Move(position(target));
        publisher.put(serde_json::to_string(&request)?).await?;
    }

    Ok(())
}

fn position(p: [f64; 3]) -> Position {
    Position::new(p[0], p[1], p[2])
}
