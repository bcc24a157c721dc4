use scpi_psu::{transport::DEFAULT_TCP_PORT, G30};
use simple_logger::SimpleLogger;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Enable logging
    SimpleLogger::new().init().unwrap();

    // Pass a serial port path (e.g. /dev/ttyUSB0) or an IP address.
    let target = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "192.168.0.50".to_string());
    let mut psu = if target.starts_with('/') || target.starts_with("COM") {
        G30::serial(target, 9600)
    } else {
        G30::tcp(target, DEFAULT_TCP_PORT)
    };

    psu.connect()?;
    println!("Connected to {}", psu.identification()?);

    // Limit the supply to what the load can take, then ramp up gently.
    psu.set_max_voltage(24.0)?;
    psu.set_over_voltage_protection(25.0)?;
    psu.set_current(1.0)?;
    psu.set_voltage(0.0)?;
    psu.enable_output(true)?;
    psu.set_voltage_with_ramp(12.0, 4.0)?;

    for _ in 0..5 {
        std::thread::sleep(Duration::from_millis(500));
        println!(
            "{:.3} V  {:.3} A  {:.3} W",
            psu.measure_voltage()?,
            psu.measure_current()?,
            psu.measure_power()?
        );
    }

    let status = psu.status()?;
    if status.is_faulted() {
        println!("Protection tripped: {status:?}");
        psu.clear_protection()?;
    }
    println!("Error queue: {}", psu.check_error()?);

    psu.set_voltage_with_ramp(0.0, 4.0)?;
    psu.disconnect();
    Ok(())
}
