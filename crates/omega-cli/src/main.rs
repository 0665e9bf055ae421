//! Command-line front end for the Omega2 hardware layer.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use omega_core::{parse_hex_byte, to_hex};
use omega_hardware::{Board, BoardConfig, BoardEvent, I2cReadArgs};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How long to wait for detached commands to report failures.
const SETTLE: Duration = Duration::from_millis(250);

/// How long to wait for a reply from the hardware.
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Drive Omega2 GPIO, PWM, I2C and serial hardware
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON board configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log commands instead of running them
    #[arg(short, long)]
    simulated: bool,

    /// Enable debug logging
    #[arg(short = 'd', long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drive a pin high or low (defaults to the LED pin)
    Write {
        value: u32,
        #[arg(short, long)]
        pin: Option<u8>,
    },

    /// Print level changes of a pin until interrupted
    Read { pin: u8 },

    /// Set the PWM duty cycle of a pin (0 parks it idle)
    Pwm { pin: u8, duty: u32 },

    /// Read one register of an I2C device
    I2cGet {
        #[arg(value_parser = parse_byte)]
        address: u8,
        #[arg(value_parser = parse_byte)]
        register: Option<u8>,
    },

    /// Write bytes to a register of an I2C device
    I2cSet {
        #[arg(value_parser = parse_byte)]
        address: u8,
        #[arg(value_parser = parse_byte)]
        register: u8,
        #[arg(value_parser = parse_byte, required = true)]
        bytes: Vec<u8>,
    },

    /// Print messages received on a serial channel until interrupted
    SerialListen {
        #[arg(short, long, default_value_t = 0)]
        channel: u8,
        #[arg(short, long, default_value_t = 115_200)]
        baud: u32,
        #[arg(short, long, default_value = "\n")]
        terminator: String,
    },

    /// Query the direction of a pin
    State { pin: u8 },

    /// Reboot the board
    Reboot,

    /// Start a firmware upgrade
    Upgrade,
}

/// Parse `0x2a`-style hex or plain decimal.
fn parse_byte(text: &str) -> Result<u8, String> {
    if text.starts_with("0x") || text.starts_with("0X") {
        parse_hex_byte(text).map_err(|e| e.to_string())
    } else {
        text.parse().map_err(|e| format!("invalid byte {text:?}: {e}"))
    }
}

fn init_logging(debug: bool) -> Result<()> {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if debug {
        filter = filter.add_directive("omega_hardware=debug".parse()?);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn load_config(args: &Args) -> Result<BoardConfig> {
    let mut config = match &args.config {
        Some(path) => BoardConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {path:?}"))?,
        None => BoardConfig::default(),
    };
    config.simulated |= args.simulated;
    Ok(config)
}

/// Fail with the first error event published within [`SETTLE`].
async fn settle(events: &mut broadcast::Receiver<BoardEvent>) -> Result<()> {
    let deadline = tokio::time::sleep(SETTLE);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => return Ok(()),
            event = events.recv() => match event {
                Ok(BoardEvent::Error(error)) => bail!("{error}"),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
        }
    }
}

/// Log events until Ctrl-C, printing what `show` picks out.
async fn watch(
    events: &mut broadcast::Receiver<BoardEvent>,
    show: impl Fn(&BoardEvent) -> Option<String>,
) -> Result<()> {
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(BoardEvent::Error(error)) => warn!("{}", error),
                Ok(event) => {
                    if let Some(line) = show(&event) {
                        println!("{line}");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Missed {} events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
        }
    }
}

async fn run(board: &Board, command: Command) -> Result<()> {
    let mut events = board.subscribe();

    match command {
        Command::Write { value, pin } => {
            let pin = pin.unwrap_or_else(|| board.default_led());
            board.digital_write(pin, value);
            settle(&mut events).await
        }
        Command::Read { pin } => {
            let (tx, mut rx) = mpsc::unbounded_channel();
            board.digital_read(pin, move |value| {
                let _ = tx.send(value);
            });
            let printer = tokio::spawn(async move {
                while let Some(value) = rx.recv().await {
                    println!("{pin}: {value}");
                }
            });
            watch(&mut events, |_| None).await?;
            board.shutdown();
            printer.abort();
            Ok(())
        }
        Command::Pwm { pin, duty } => {
            board.pwm_write(pin, duty);
            settle(&mut events).await
        }
        Command::I2cGet { address, register } => {
            let args = match register {
                Some(register) => I2cReadArgs::Register {
                    address,
                    register,
                    length: 1,
                },
                None => I2cReadArgs::Address { address, length: 1 },
            };
            let (tx, mut rx) = mpsc::unbounded_channel();
            board.i2c_read_once(args, move |data: &[u8]| {
                let _ = tx.send(data.to_vec());
            });

            let reply = tokio::time::timeout(REPLY_TIMEOUT, async {
                tokio::select! {
                    data = rx.recv() => data.ok_or_else(|| anyhow!("I2C read was dropped")),
                    error = next_error(&mut events) => Err(error),
                }
            })
            .await
            .context("Timed out waiting for I2C reply")??;

            let bytes: Vec<String> = reply.into_iter().map(to_hex).collect();
            println!("{}", bytes.join(" "));
            Ok(())
        }
        Command::I2cSet {
            address,
            register,
            bytes,
        } => {
            board.i2c_write(address, (register, bytes));
            settle(&mut events).await
        }
        Command::SerialListen {
            channel,
            baud,
            terminator,
        } => {
            board
                .serial_open(baud, channel)?
                .serial_listen(terminator.as_bytes(), channel)?;
            info!("Listening on {}", board.serial_address(channel).display());
            watch(&mut events, |event| match event {
                BoardEvent::SerialMessage(message) => Some(message.text().trim_end().to_string()),
                _ => None,
            })
            .await?;
            board.serial_close(channel);
            Ok(())
        }
        Command::State { pin } => {
            let (tx, rx) = oneshot::channel();
            board.query_pin_state(pin, move |mode| {
                let _ = tx.send(mode);
            });
            let mode = tokio::time::timeout(REPLY_TIMEOUT, rx)
                .await
                .context("Timed out waiting for pin direction")??;
            let mode = mode.ok_or_else(|| anyhow!("pin {pin} has no known direction"))?;
            println!("{pin}: {}", mode.to_string().to_lowercase());
            Ok(())
        }
        Command::Reboot => {
            board.reboot();
            settle(&mut events).await
        }
        Command::Upgrade => {
            board.upgrade();
            settle(&mut events).await
        }
    }
}

async fn next_error(events: &mut broadcast::Receiver<BoardEvent>) -> anyhow::Error {
    loop {
        match events.recv().await {
            Ok(BoardEvent::Error(error)) => return anyhow!("{error}"),
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return anyhow!("board closed"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug)?;

    let config = load_config(&args)?;
    let board = Board::new(config).context("Failed to initialize board")?;
    run(&board, args.command).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0x20", 0x20)]
    #[case("0X1f", 0x1f)]
    #[case("32", 32)]
    fn test_parse_byte(#[case] text: &str, #[case] expected: u8) {
        assert_eq!(parse_byte(text).unwrap(), expected);
    }

    #[test]
    fn test_parse_byte_rejects_out_of_range() {
        assert!(parse_byte("256").is_err());
        assert!(parse_byte("0x100").is_err());
    }

    #[test]
    fn test_parse_i2c_set() {
        let args = Args::try_parse_from([
            "omega-io",
            "--simulated",
            "i2c-set",
            "0x20",
            "1",
            "0xaa",
            "0xbb",
        ])
        .unwrap();
        assert!(args.simulated);
        match args.command {
            Command::I2cSet {
                address,
                register,
                bytes,
            } => {
                assert_eq!((address, register), (0x20, 1));
                assert_eq!(bytes, vec![0xaa, 0xbb]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_write_defaults_to_led() {
        let args = Args::try_parse_from(["omega-io", "write", "1"]).unwrap();
        assert!(matches!(args.command, Command::Write { value: 1, pin: None }));
    }

    #[tokio::test]
    async fn test_simulated_write_settles() {
        let board = Board::new(BoardConfig::simulated()).unwrap();
        run(&board, Command::Write { value: 1, pin: None }).await.unwrap();
        assert_eq!(board.pin(44).unwrap().value, 1);
    }
}
