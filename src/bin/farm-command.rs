//! Farm Device Command Utility
//!
//! Publishes one control command to a running farm agent, the same way a
//! dashboard would.
//!
//! ## Usage
//!
//! ```bash
//! # Switch the fan on
//! farm-command --device-id greenhouse-01 --type fan --action on
//!
//! # Everything off
//! farm-command --device-id greenhouse-01 --type all --action off
//!
//! # Take a picture
//! farm-command --device-id greenhouse-01 --type camera --action capture
//! ```

use clap::Parser;
use farm_agent::protocol::{
    validate_device_id, CommandEnvelope, ControlCommand, TopicSet, DEFAULT_TOPIC_ROOT,
};
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, Event, MqttOptions};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::{timeout, Duration};

#[derive(Parser)]
#[command(
    name = "farm-command",
    about = "Send a control command to a farm device agent"
)]
struct Args {
    /// Target device ID
    #[arg(long, required = true)]
    device_id: String,

    /// Command type: pump, led, fan, all or camera
    #[arg(long = "type", required = true)]
    kind: String,

    /// Command action: on, off or capture
    #[arg(long, required = true)]
    action: String,

    /// Topic root the agent was configured with
    #[arg(long, default_value = DEFAULT_TOPIC_ROOT)]
    topic_root: String,

    /// Send even if the agent would ignore the command
    #[arg(long)]
    force: bool,

    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    broker_host: String,

    /// MQTT broker port
    #[arg(long, default_value = "1883")]
    broker_port: u16,
}

async fn send_command(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    validate_device_id(&args.device_id)?;

    let envelope = CommandEnvelope::new(args.kind.as_str(), args.action.as_str());
    match ControlCommand::try_from(&envelope) {
        Ok(command) => println!("Command: {command:?}"),
        Err(e) if args.force => println!("Sending anyway: {e}"),
        Err(e) => return Err(e.into()),
    }

    let topics = TopicSet::for_device(&args.topic_root, &args.device_id);
    let client_id = format!(
        "farm-command-{}",
        SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis()
    );

    println!(
        "Connecting to MQTT broker {}:{}...",
        args.broker_host, args.broker_port
    );

    let mut options = MqttOptions::new(client_id, &args.broker_host, args.broker_port);
    options.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(options, 10);

    let payload = serde_json::to_vec(&envelope)?;
    client
        .publish(topics.control.clone(), QoS::AtLeastOnce, false, payload)
        .await?;

    // Drive the session until the broker acknowledges the command
    let acknowledged = timeout(Duration::from_secs(5), async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::PubAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(e),
            }
        }
    })
    .await;

    match acknowledged {
        Ok(Ok(())) => {
            println!("✓ Sent {} {} to {}", args.kind, args.action, topics.control);
            println!("  Status reports appear on {}", topics.status);
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Err("Timed out waiting for the broker to acknowledge".into()),
    }

    client.disconnect().await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = send_command(&args).await {
        eprintln!("✗ Failed to send command: {e}");
        std::process::exit(1);
    }
}
