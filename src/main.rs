use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use ultrasonic_modem::{
    bits::{bytes_to_hex, hex_to_byte},
    CoderMode, Config, ControlCode, Decoder, Encoder, Frame, MemorySink, MemorySource, PcmReader,
    PcmWriter, SampleSink, SampleSource, BROADCAST_ADDRESS,
};

#[derive(Parser)]
#[command(name = "ultrasonic-modem")]
#[command(about = "Multi-channel FSK modem for near-ultrasonic data transfer", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ModemArgs {
    /// Sample rate in Hz
    #[arg(long, default_value = "48000")]
    sample_rate: u32,

    /// Number of parallel channels (power of two)
    #[arg(long, short = 'n', default_value = "16")]
    channels: usize,

    /// Lowest tone frequency in Hz
    #[arg(long, default_value = "18000")]
    first_freq: u32,

    /// Spacing between adjacent tones in Hz
    #[arg(long, default_value = "20")]
    freq_step: u32,

    /// Tone length in seconds [default: 2 / freq_step]
    #[arg(long)]
    pulse: Option<f64>,

    /// Silence between tones in seconds [default: twice the pulse]
    #[arg(long = "break")]
    break_: Option<f64>,

    /// Disable Hamming(8,4) SECDED coding
    #[arg(long)]
    no_secded: bool,

    /// FFT size used by the receiver
    #[arg(long, default_value = "8192")]
    nfft: usize,

    /// Minimal spectral power counted as a tone
    #[arg(long, default_value = "0.3")]
    threshold: f64,
}

impl ModemArgs {
    fn config(&self, mode: CoderMode) -> Config {
        Config {
            t_one_pulse: self.pulse,
            t_break: self.break_,
            secded: !self.no_secded,
            mode,
            nfft: self.nfft,
            threshold: self.threshold,
            ..Config::new(self.sample_rate, self.channels, self.first_freq, self.freq_step)
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a message as raw s16le PCM
    Send {
        #[command(flatten)]
        modem: ModemArgs,

        /// Send bare hex digits instead of a data frame
        #[arg(long, conflicts_with_all = ["data", "command"])]
        hex: Option<String>,

        /// Text to send in a data frame (if not provided, reads from stdin)
        #[arg(short, long)]
        data: Option<String>,

        /// Send a command frame, e.g. ENQ
        #[arg(long, conflicts_with = "data")]
        command: Option<String>,

        /// Receiver address in hex
        #[arg(long, short, default_value = "ff")]
        address: String,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Decode raw s16le PCM
    Receive {
        #[command(flatten)]
        modem: ModemArgs,

        /// Decode bare hex digits instead of data frames
        #[arg(long)]
        simple: bool,

        /// Own device address in hex, accepts every frame when omitted
        #[arg(long, short)]
        address: Option<String>,

        /// Input file (stdin when omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Encode and decode a message in memory
    Test {
        #[command(flatten)]
        modem: ModemArgs,

        /// Treat the message as bare hex digits
        #[arg(long)]
        hex: bool,

        /// Test message
        #[arg(default_value = "Alamakota")]
        message: String,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Send {
            modem,
            hex,
            data,
            command,
            address,
            output,
        } => {
            let sink: Box<dyn Write> = match output {
                Some(path) => Box::new(BufWriter::new(
                    File::create(&path).with_context(|| format!("creating {}", path.display()))?,
                )),
                None => Box::new(BufWriter::new(io::stdout().lock())),
            };
            let sink = PcmWriter::new(sink);

            match hex {
                Some(hex) => send_hex(modem.config(CoderMode::Simple), &hex, sink)?,
                None => {
                    let address = hex_to_byte(&address)?;
                    let config = modem.config(CoderMode::DataFrame);
                    let frame = match command {
                        Some(name) => {
                            let code = ControlCode::from_name(&name)
                                .ok_or_else(|| anyhow!("unknown control code {}", name))?;
                            Frame::command_frame(address, code.value(), config.channels)?
                        }
                        None => {
                            let payload = read_payload(data)?;
                            Frame::data_frame(address, &payload, config.channels)?
                        }
                    };
                    send_frame(config, frame, sink)?;
                }
            }
        }

        Commands::Receive {
            modem,
            simple,
            address,
            input,
        } => {
            let source: Box<dyn Read> = match input {
                Some(path) => Box::new(BufReader::new(
                    File::open(&path).with_context(|| format!("opening {}", path.display()))?,
                )),
                None => Box::new(BufReader::new(io::stdin().lock())),
            };
            let mode = if simple {
                CoderMode::Simple
            } else {
                CoderMode::DataFrame
            };
            let address = address.as_deref().map(hex_to_byte).transpose()?;
            receive(modem.config(mode), address, PcmReader::new(source))?;
        }

        Commands::Test {
            modem,
            hex,
            message,
        } => {
            println!("Running loopback test with message: {}", message);
            if hex {
                run_hex_test(modem.config(CoderMode::Simple), &message)?;
            } else {
                run_test(modem.config(CoderMode::DataFrame), &message)?;
            }
        }
    }

    Ok(())
}

fn read_payload(data: Option<String>) -> Result<Vec<u8>> {
    let payload = match data {
        Some(d) => d.into_bytes(),
        None => {
            let mut buffer = Vec::new();
            io::stdin().read_to_end(&mut buffer)?;
            buffer
        }
    };
    if payload.is_empty() {
        bail!("No data to send");
    }
    Ok(payload)
}

fn send_hex<K: SampleSink>(config: Config, hex: &str, sink: K) -> Result<()> {
    let mut encoder = Encoder::new(config, sink)?;
    eprintln!("{}", encoder);
    encoder.set_hex_data(hex);
    encoder.run()?;
    eprintln!("Sent {} bits at {} b/s", encoder.encoded_bits().len(), encoder.bit_rate());
    Ok(())
}

fn send_frame<K: SampleSink>(config: Config, frame: Frame, sink: K) -> Result<()> {
    let mut encoder = Encoder::new(config, sink)?;
    eprintln!("{}", encoder);
    eprintln!("{}", frame);
    encoder.transmit_frame(frame)?;
    eprintln!("Sent {} bits at {} b/s", encoder.encoded_bits().len(), encoder.bit_rate());
    Ok(())
}

fn receive<S: SampleSource>(config: Config, address: Option<u8>, source: S) -> Result<()> {
    let mode = config.mode;
    let mut decoder = Decoder::new(config, source)?;
    eprintln!("{}", decoder);
    decoder.set_device_address(address);
    decoder.run()?;

    match mode {
        CoderMode::Simple => println!("{}", decoder.received_hex()),
        CoderMode::DataFrame => match decoder.take_reception() {
            Some(outcome) => {
                eprintln!("Parser result: {}", outcome.result);
                if let Some(frame) = outcome.frame {
                    println!("{}", frame);
                    if let Some(data) = frame.data() {
                        io::stdout().write_all(data)?;
                        println!();
                    }
                }
            }
            None => bail!("No frame received"),
        },
    }
    Ok(())
}

fn run_hex_test(config: Config, hex: &str) -> Result<()> {
    let mut encoder = Encoder::new(config.clone(), MemorySink::new())?;
    encoder.set_hex_data(hex);
    encoder.run()?;
    let expected = encoder.hex_message_string();
    let samples = encoder.into_sink().take();
    println!("Audio samples: {}", samples.len());

    let mut decoder = Decoder::new(config, MemorySource::new(samples))?;
    decoder.run()?;
    println!("Decoded message: {}", decoder.received_hex());

    if decoder.received_hex() == expected {
        println!("\n✓ Test PASSED: Messages match!");
    } else {
        println!("\n✗ Test FAILED: Messages don't match!");
        std::process::exit(1);
    }
    Ok(())
}

fn run_test(config: Config, message: &str) -> Result<()> {
    let frame = Frame::data_frame(BROADCAST_ADDRESS, message.as_bytes(), config.channels)?;
    let frame_bytes = frame.to_bytes();

    let mut encoder = Encoder::new(config.clone(), MemorySink::new())?;
    encoder.transmit_frame(frame)?;
    let samples = encoder.into_sink().take();

    println!("Frame: {} bytes ({})", frame_bytes.len(), bytes_to_hex(&frame_bytes));
    println!("Audio samples: {}", samples.len());
    println!(
        "Duration: {:.1} s",
        samples.len() as f64 / config.sample_rate as f64
    );

    let mut decoder = Decoder::new(config, MemorySource::new(samples))?;
    decoder.run()?;

    let outcome = decoder
        .take_reception()
        .ok_or_else(|| anyhow!("Demodulation failed"))?;
    let decoded = outcome
        .frame
        .as_ref()
        .and_then(Frame::data)
        .map(|data| data[..message.len().min(data.len())].to_vec())
        .unwrap_or_default();

    println!("\nParser result: {}", outcome.result);
    println!("Decoded message: {}", String::from_utf8_lossy(&decoded));

    if decoded == message.as_bytes() {
        println!("\n✓ Test PASSED: Messages match!");
    } else {
        println!("\n✗ Test FAILED: Messages don't match!");
        std::process::exit(1);
    }

    Ok(())
}
