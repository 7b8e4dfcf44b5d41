use std::env;

use der_gsf::{
    catalog::FunctionCatalog,
    commit::CurveCommitProtocol,
    config::SessionConfig,
    curve::DependentRef,
    function::{FunctionKind, GridSupportFunction, scalar},
    ieee1547::Ieee1547Translator,
    registry,
    transport::ModbusFramed,
};
use inquire::Select;
use serialport::SerialPort;
use tracing_subscriber::EnvFilter;

// Configuration constants - adjust these for your setup
const BAUD_RATE: u32 = 9600;
// Curve adoption can keep the inverter busy, a reasonably large time out is required.
const SERIAL_TIMEOUT_MS: u64 = 1000;

// Used when no session file is given on the command line.
const DEFAULT_SESSION: &str = "
mode: SunSpec
connection:
  slave_id: 1
  models:
    705: 40300
  points_per_curve: 4
  curves: 3
";

pub struct PortWrapper(Box<dyn SerialPort>);

#[derive(Debug)]
pub struct IoError(std::io::Error);

impl core::fmt::Display for IoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl embedded_io::Error for IoError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self.0.kind() {
            std::io::ErrorKind::NotFound => embedded_io::ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => embedded_io::ErrorKind::PermissionDenied,
            std::io::ErrorKind::BrokenPipe => embedded_io::ErrorKind::BrokenPipe,
            std::io::ErrorKind::InvalidInput => embedded_io::ErrorKind::InvalidInput,
            std::io::ErrorKind::InvalidData => embedded_io::ErrorKind::InvalidData,
            std::io::ErrorKind::TimedOut => embedded_io::ErrorKind::TimedOut,
            std::io::ErrorKind::Interrupted => embedded_io::ErrorKind::Interrupted,
            std::io::ErrorKind::Unsupported => embedded_io::ErrorKind::Unsupported,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for PortWrapper {
    type Error = IoError;
}

impl embedded_io::Read for PortWrapper {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        std::io::Read::read(&mut self.0, buf).map_err(IoError)
    }
}

impl embedded_io::Write for PortWrapper {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        std::io::Write::write(&mut self.0, buf).map_err(IoError)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        std::io::Write::flush(&mut self.0).map_err(IoError)
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Get serial port from command line arg or interactive selection
    let port_name = env::args().nth(1).unwrap_or_else(|| {
        let ports = serialport::available_ports().expect("Failed to enumerate serial ports");

        if ports.is_empty() {
            eprintln!("No serial ports found!");
            std::process::exit(1);
        }

        let port_names: Vec<String> = ports.iter().map(|p| p.port_name.clone()).collect();

        Select::new("Select a serial port:", port_names)
            .prompt()
            .expect("Failed to select port")
    });

    let config = match env::args().nth(2) {
        Some(path) => SessionConfig::from_file(path).expect("Failed to load session"),
        None => SessionConfig::from_yaml_str(DEFAULT_SESSION).expect("Invalid default session"),
    };
    println!("Using port: {} in {} mode", port_name, config.mode);

    let port = serialport::new(&port_name, BAUD_RATE)
        .timeout(std::time::Duration::from_millis(SERIAL_TIMEOUT_MS))
        .open()
        .expect("Failed to open serial port");

    let transport: ModbusFramed<PortWrapper> = ModbusFramed::rtu(PortWrapper(port), config.connection.slave_id);
    let adapter = registry::open_session(&config, Box::new(transport)).expect("Failed to open device");

    let catalog = FunctionCatalog::new(&adapter)
        .with_protocol(CurveCommitProtocol::with_policy(config.connection.commit.policy()));
    println!("Supported functions: {:?}", catalog.supported());

    // Read back the current volt-var settings
    let current = catalog.get(FunctionKind::VoltVar).expect("Failed to read volt-var");
    println!("{:#?}", current);

    // Program the IEEE 1547 category B default curve into the first writable slot
    let translator = Ieee1547Translator::for_adapter(&adapter, FunctionKind::VoltVar);
    let volt_var = GridSupportFunction::new(FunctionKind::VoltVar).enabled(true);
    let curve = volt_var
        .blank_curve(translator.curve_index, translator.max_points)
        .expect("volt-var has curves")
        .with_points([(92.0, 44.0), (98.0, 0.0), (102.0, 0.0), (108.0, -44.0)])
        .expect("Invalid curve")
        .with_dependent_ref(DependentRef::VArMaxPct)
        .with_response_time(5.0);
    let volt_var = volt_var.with_curve(curve).with_scalar(scalar::V_REF, 100.0);

    match catalog.set(&volt_var).expect("Failed to set volt-var") {
        Some(attempt) => println!(
            "Curve {} committed after {} polls",
            attempt.requested_curve, attempt.polls
        ),
        None => println!("Volt-var written"),
    }

    // Verify the settings were applied, in IEEE 1547 terms
    let standard = translator
        .get(&catalog, FunctionKind::VoltVar)
        .expect("Failed to read volt-var");
    println!("{:#?}", standard);

    adapter.close().expect("Failed to close device");
}
