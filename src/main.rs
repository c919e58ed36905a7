use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::{Receiver, RecvTimeoutError};

use gaiaedit::config::{self, EditorConfig};
use gaiaedit::layout::{Location, BANK_COUNT, PATCHES_PER_BANK};
use gaiaedit::midi_io::{self, MidiLink};
use gaiaedit::{patch_file, svd, Patch, Session, SessionEvent};

const POLL: Duration = Duration::from_millis(10);
const IDENTIFY_WAIT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "gaiaedit", version = env!("CARGO_PKG_VERSION"), about = "GAIA SH-01 patch editor")]
struct Args {
    #[arg(short, long, help = "Config file (default: <config dir>/gaiaedit/config.yaml)")]
    config: Option<PathBuf>,

    #[arg(short, long, help = "MIDI port name substring, overrides the config")]
    port: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List MIDI ports
    Ports,
    /// Ask the device for its identity
    Identify,
    /// Read a patch from the device into a file
    Fetch {
        #[arg(long, value_parser = parse_user_slot, help = "User patch such as B-3 (default: temporary)")]
        user: Option<(u8, u8)>,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Send a patch file to the device
    Push {
        file: PathBuf,
        #[arg(long, value_parser = parse_user_slot, help = "Store into user patch such as B-3")]
        user: Option<(u8, u8)>,
    },
    /// Split a USB backup dump into patch files
    SvdExtract { dump: PathBuf, outdir: PathBuf },
}

/// "A-1" through "H-8" to zero-based (bank, index).
fn parse_user_slot(s: &str) -> Result<(u8, u8), String> {
    let (bank, index) = s
        .trim()
        .split_once('-')
        .ok_or_else(|| format!("invalid user patch {s:?} (expected e.g. \"A-1\")"))?;
    let bank = match bank.trim().to_ascii_uppercase().as_bytes() {
        [letter @ b'A'..=b'Z'] => letter - b'A',
        _ => return Err(format!("invalid bank {bank:?}")),
    };
    let index: u8 = index
        .trim()
        .parse()
        .map_err(|_| format!("invalid patch number {index:?}"))?;
    if bank >= BANK_COUNT || index == 0 || index > PATCHES_PER_BANK {
        return Err(format!("user patch {s:?} out of range A-1..H-8"));
    }
    Ok((bank, index - 1))
}

fn slot_label(bank: u8, index: u8) -> String {
    format!("{}-{}", (b'A' + bank) as char, index + 1)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(config::default_config_path);
    let mut config = config::load_config(&config_path);
    if let Some(port) = &args.port {
        config.port_match = port.clone();
    }

    match args.command {
        Command::Ports => list_ports(),
        Command::SvdExtract { dump, outdir } => svd_extract(&dump, &outdir),
        Command::Identify => identify(&config),
        Command::Fetch { user, output } => fetch(&config, user, &output),
        Command::Push { file, user } => push(&config, &file, user),
    }
}

fn list_ports() -> Result<()> {
    let (inputs, outputs) = midi_io::list_ports()?;
    println!("Inputs:");
    for name in inputs {
        println!("  {name}");
    }
    println!("Outputs:");
    for name in outputs {
        println!("  {name}");
    }
    Ok(())
}

fn connect(config: &EditorConfig) -> Result<(Session<MidiLink>, Receiver<Vec<u8>>)> {
    let link = MidiLink::connect(&config.port_match)
        .with_context(|| format!("Failed to open MIDI ports matching '{}'", config.port_match))?;
    let inbound = link.inbound().clone();
    Ok((Session::new(link, config), inbound))
}

/// Feed inbound MIDI to the session until `done` or `limit` elapses.
fn run_until(
    session: &mut Session<MidiLink>,
    inbound: &Receiver<Vec<u8>>,
    limit: Option<Duration>,
    mut done: impl FnMut(&mut Session<MidiLink>) -> bool,
) -> Result<()> {
    let start = Instant::now();
    while !done(session) {
        match inbound.recv_timeout(POLL) {
            Ok(raw) => session.handle_raw(&raw, Instant::now())?,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => bail!("MIDI input closed"),
        }
        session.tick(Instant::now()).context("Device stopped answering")?;
        if limit.is_some_and(|limit| start.elapsed() > limit) {
            bail!("Timed out waiting for the device");
        }
    }
    Ok(())
}

fn identify(config: &EditorConfig) -> Result<()> {
    let (mut session, inbound) = connect(config)?;
    let events = session.subscribe();
    session.identify()?;

    let mut reply = None;
    run_until(&mut session, &inbound, Some(IDENTIFY_WAIT), |_| {
        for event in events.try_iter() {
            if let SessionEvent::DeviceIdentified { device_id, revision } = event {
                reply = Some((device_id, revision));
            }
        }
        reply.is_some()
    })?;
    if let Some((device_id, revision)) = reply {
        println!("device id {device_id:#04X}, revision {revision:02X?}");
    }
    Ok(())
}

fn fetch(config: &EditorConfig, user: Option<(u8, u8)>, output: &Path) -> Result<()> {
    let (mut session, inbound) = connect(config)?;
    let events = session.subscribe();
    let now = Instant::now();
    let location = match user {
        Some((bank, index)) => {
            session.fetch_user(bank, index, |_| {}, now)?;
            Location::User { bank, index }
        }
        None => {
            session.fetch_temporary(|_| {}, now)?;
            Location::Temporary
        }
    };

    run_until(&mut session, &inbound, None, |_| {
        events
            .try_iter()
            .any(|event| event == SessionEvent::SyncComplete(location))
    })?;

    let patch = match user {
        Some((bank, index)) => session.user_patch(bank, index),
        None => Some(session.temporary()),
    }
    .context("Patch disappeared after fetch")?;
    patch_file::save(output, patch)?;
    println!("{} -> {}", patch.name().unwrap_or_default(), output.display());
    Ok(())
}

fn push(config: &EditorConfig, file: &Path, user: Option<(u8, u8)>) -> Result<()> {
    let mut patch = Patch::new(Location::Temporary);
    patch_file::load(file, &mut patch).with_context(|| format!("Failed to load {}", file.display()))?;
    if !patch.is_complete() {
        bail!("{} does not hold a complete patch", file.display());
    }

    let (mut session, _inbound) = connect(config)?;
    match user {
        Some((bank, index)) => {
            session.write_user(bank, index, &patch)?;
            println!("stored {} as {}", patch.name().unwrap_or_default(), slot_label(bank, index));
        }
        None => {
            session.load_temporary_from(&patch, Instant::now())?;
            session.save_temporary()?;
            println!("sent {}", patch.name().unwrap_or_default());
        }
    }
    Ok(())
}

fn file_name(bank: u8, index: u8, patch: &Patch) -> String {
    let name: String = patch
        .name()
        .unwrap_or_default()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == ' ' || c == '-' { c } else { '_' })
        .collect();
    format!("{} {}.gaia", slot_label(bank, index), name.trim())
}

fn svd_extract(dump: &Path, outdir: &Path) -> Result<()> {
    let patches = svd::read_file(dump).with_context(|| format!("Failed to read {}", dump.display()))?;
    std::fs::create_dir_all(outdir)
        .with_context(|| format!("Failed to create {}", outdir.display()))?;
    for patch in &patches {
        let Location::User { bank, index } = patch.location() else {
            continue;
        };
        let path = outdir.join(file_name(bank, index, patch));
        patch_file::save(&path, patch)?;
    }
    println!("extracted {} patches to {}", patches.len(), outdir.display());
    Ok(())
}
