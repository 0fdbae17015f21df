//! Wificom command line interface.

use std::process;

use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_t, App, AppSettings::*, Arg,
    ArgMatches,
};
use console::style;
use log::{debug, error, trace, LevelFilter};
use serialport::{DataBits, FlowControl, Parity, StopBits};
use simplelog::*;

use wificom::{
    self as wc,
    config::{FirmwareDescriptor, MAX_ROUTERS, MD5_LEN},
    hal::ReadySignal,
};

fn main() {
    println!("[WC] wificom v{}", crate_version!());

    let matches = App::new(crate_name!())
        .version(format!("v{}", crate_version!()).as_str())
        .author(crate_authors!())
        .about(crate_description!())
        .long_about(
            "\n\
            Wificom boots a WiFi co-processor wired to a USB serial adapter \
            (RTS to reset, DTR to the boot strap, CTS from the ready line), \
            checks the firmware in its flash against the given image and \
            rewrites it when needed, then keeps the link alive and joins the \
            configured network.\n\
            \n\
            The firmware image carries its MD5 digest as its last 16 bytes. \
            Together with the digest and length given on the command line it \
            decides whether the flash is left alone or rewritten.\n\
            \n\
            Press Ctrl+C to park the co-processor in reset and exit.\
        ",
        )
        .max_term_width(80)
        .setting(ColoredHelp)
        .setting(NextLineHelp)
        .arg(
            Arg::with_name("DEVICE_TTY")
                .help("the USB tty device to use")
                .long_help(
                    "the USB tty device to use; when not set, the list of \
                     connected serial devices is presented for selection.",
                )
                .short("-t")
                .long("--tty")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("BAUD_RATE")
                .help("baud rate once the application firmware runs")
                .short("-b")
                .long("--baud-rate")
                .takes_value(true)
                .default_value("2000000")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("DATA_BITS")
                .help("number of bits per character")
                .short("-d")
                .long("--data-bits")
                .takes_value(true)
                .possible_values(&["5", "6", "7", "8"])
                .default_value("8")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("STOP_BITS")
                .help("number of stop bits per byte")
                .short("-s")
                .long("--stop-bits")
                .takes_value(true)
                .possible_values(&["1", "2"])
                .default_value("1")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("PARITY")
                .help("parity checking protocol")
                .short("-p")
                .long("--parity")
                .takes_value(true)
                .possible_values(&["none", "odd", "even"])
                .default_value("none")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("FLOW_CONTROL")
                .help("flow control mode")
                .short("-f")
                .long("--flow-control")
                .takes_value(true)
                .possible_values(&["none", "soft", "hard"])
                .default_value("none")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("STUB")
                .help("path to the flasher stub")
                .long("--stub")
                .takes_value(true)
                .default_value("esp_stub.bin")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("SSID")
                .help("network to join, repeat for up to 4 networks")
                .long("--ssid")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .max_values(MAX_ROUTERS as u64),
        )
        .arg(
            Arg::with_name("PASSWORD")
                .help("password of the matching --ssid")
                .long("--password")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .max_values(MAX_ROUTERS as u64),
        )
        .arg(
            Arg::with_name("AP_SSID")
                .help("name of the access point to host")
                .long("--ap-ssid")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("AP_PASSWORD")
                .help("password of the hosted access point, at least 8 characters")
                .long("--ap-password")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("ENABLE_AP")
                .help("host an access point instead of joining a network")
                .long("--enable-ap"),
        )
        .arg(
            Arg::with_name("FW_MD5")
                .help("expected MD5 of the firmware, 32 hex digits")
                .long("--fw-md5")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("FW_LEN")
                .help("expected length of the firmware in bytes")
                .long("--fw-len")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("FIRMWARE_IMAGE")
                .help("path to the co-processor firmware image")
                .long_help(
                    "path to the co-processor firmware image; when not set, \
                     `wificom` looks for `wifi_firmware.bin` in the current \
                     working directory and runs whatever is in flash if it is \
                     not there.",
                )
                .index(1),
        )
        .arg(Arg::with_name("v").short("v").multiple(true).help(
            "Sets the logging level of verbosity, repeat several times for \
                higher verbosity",
        ))
        .get_matches();

    let log_level = match matches.occurrences_of("v") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if let Err(e) = TermLogger::init(log_level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto) {
        println!("{}: logger setup failed: {}", style("warning").yellow(), e);
    }

    trace!("{:#?}", matches);

    // Arguments with default values ===========================================

    let baud_rate = value_t!(matches.value_of("BAUD_RATE"), u32)
        .unwrap_or_else(|_| invalid_value(&matches, "BAUD_RATE", "baud-rate"));

    let data_bits = match matches.value_of("DATA_BITS") {
        Some("5") => DataBits::Five,
        Some("6") => DataBits::Six,
        Some("7") => DataBits::Seven,
        _ => DataBits::Eight,
    };

    let stop_bits = match matches.value_of("STOP_BITS") {
        Some("2") => StopBits::Two,
        _ => StopBits::One,
    };

    let parity = match matches.value_of("PARITY") {
        Some("even") => Parity::Even,
        Some("odd") => Parity::Odd,
        _ => Parity::None,
    };

    let flow_control = match matches.value_of("FLOW_CONTROL") {
        Some("soft") => FlowControl::Software,
        Some("hard") => FlowControl::Hardware,
        _ => FlowControl::None,
    };

    let firmware = matches
        .value_of("FIRMWARE_IMAGE")
        .unwrap_or("wifi_firmware.bin");
    let stub = matches.value_of("STUB").unwrap_or("esp_stub.bin");

    // END - Arguments with default values =====================================

    let mut settings = wc::SettingsBuilder::default()
        .baud_rate(baud_rate)
        .stub_baud_rate(baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .flow_control(flow_control)
        .firmware_image(firmware)
        .stub_image(stub)
        .show_progress(true)
        .finalize();

    if let Some(path) = matches.value_of("DEVICE_TTY") {
        settings.path = Some(path.into());
    }

    let config = build_config(&matches);

    // Run the state machine ===================================================

    let interrupted = wc::lifecycle::ShutdownHandle::default();
    let handle = interrupted.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!("🛑 received Ctrl+C!");
        handle.request();
    }) {
        error!("Failed to install the Ctrl+C handler: {}", e);
        process::exit(-1);
    }

    let path = match settings.path.clone() {
        Some(path) => path,
        None => match wc::select_port() {
            Some(path) => path,
            None => process::exit(0),
        },
    };
    if !wc::wait_for_port(&path, &interrupted) {
        process::exit(0);
    }
    settings.path = Some(path);

    let ready = ReadySignal::new();
    let io = match wc::SerialPortIo::open(&settings, ready.clone()) {
        Ok(io) => io,
        Err(e) => {
            println!("{}: {}", style("error").red(), e);
            process::exit(-1);
        }
    };

    let link = wc::Link::new(io, wc::SystemClock::new(), ready, settings, config);
    let mut lifecycle = wc::lifecycle::factory(link).with_shutdown(interrupted);

    let exit_code = lifecycle.run();
    debug!("exit code: {}", exit_code);
    process::exit(exit_code.into());
}

fn build_config(matches: &ArgMatches) -> wc::MemoryConfig {
    let mut config = wc::MemoryConfig::default();

    let ssids: Vec<&str> = matches.values_of("SSID").map(Iterator::collect).unwrap_or_default();
    let passwords: Vec<&str> = matches
        .values_of("PASSWORD")
        .map(Iterator::collect)
        .unwrap_or_default();
    for (slot, ssid) in ssids.iter().enumerate().take(MAX_ROUTERS) {
        let password = passwords.get(slot).copied().unwrap_or("");
        config.stations[slot] = credentials(ssid, password);
    }

    if let Some(ssid) = matches.value_of("AP_SSID") {
        let password = matches.value_of("AP_PASSWORD").unwrap_or("");
        config.access_point = credentials(ssid, password);
    }
    config.ap_enabled = matches.is_present("ENABLE_AP");

    let length = match matches.value_of("FW_LEN") {
        Some(_) => value_t!(matches.value_of("FW_LEN"), u32)
            .unwrap_or_else(|_| invalid_value(matches, "FW_LEN", "fw-len")),
        None => 0,
    };
    let md5 = match matches.value_of("FW_MD5") {
        Some(hex) => {
            parse_md5(hex).unwrap_or_else(|| invalid_value(matches, "FW_MD5", "fw-md5"))
        }
        None => [0; MD5_LEN],
    };
    config.firmware = FirmwareDescriptor { length, md5 };
    config
}

fn credentials(ssid: &str, password: &str) -> wc::Credentials {
    wc::Credentials::new(ssid, password).unwrap_or_else(|| {
        println!(
            "{}: `{}` and its password must be at most 32 bytes",
            style("error").red(),
            style(ssid).cyan()
        );
        process::exit(-1);
    })
}

fn parse_md5(hex: &str) -> Option<[u8; MD5_LEN]> {
    if hex.len() != 2 * MD5_LEN || !hex.is_ascii() {
        return None;
    }
    let mut md5 = [0u8; MD5_LEN];
    for (i, byte) in md5.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16).ok()?;
    }
    Some(md5)
}

fn invalid_value(matches: &ArgMatches, arg: &str, flag: &str) -> ! {
    println!(
        "{}: `{}` has an invalid value",
        style("error").red(),
        style(flag).cyan()
    );
    println!(
        "   {} `{}` is not a valid value",
        style("-->").cyan(),
        style(matches.value_of(arg).unwrap_or_default()).on_red()
    );
    process::exit(-1);
}
