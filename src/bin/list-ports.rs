use serialmon::port::{Ports, SystemPorts};
use serialmon::status::Status;

fn main() {
    let mut system = SystemPorts;
    let ports = system.list();
    if ports.is_empty() {
        println!("Available serial ports:\n  No serial ports found!");
        return;
    }
    println!("{}", Status::PortsListed(ports));
}
