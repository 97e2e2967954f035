use px86_core::System;
use px86_pc::{MachineConfig, PcSystem, SerialConsole, BINARY_MOUNT_POINT};
use std::io;

/// Print "OK" on COM1, leave 0x2A in EAX and jump to address 0
const PROGRAM: &[u8] = &[
    0xBA, 0xF8, 0x03, 0x00, 0x00, // MOV EDX, 0x3F8
    0xB0, b'O', //                   MOV AL, 'O'
    0xEE, //                         OUT DX, AL
    0xB0, b'K', //                   MOV AL, 'K'
    0xEE, //                         OUT DX, AL
    0xB8, 0x2A, 0x00, 0x00, 0x00, // MOV EAX, 0x2A
    0xE9, 0xEB, 0x83, 0xFF, 0xFF, // JMP 0
];

fn main() {
    let serial = SerialConsole::new(io::empty(), Vec::new());
    let mut sys = PcSystem::new(MachineConfig::default(), serial);

    if let Err(e) = sys.mount(BINARY_MOUNT_POINT, PROGRAM) {
        eprintln!("Cannot mount program: {}", e);
        return;
    }

    match sys.run() {
        Ok(reason) => println!("Headless run finished: {:?}", reason),
        Err(e) => println!("Headless run failed: {}", e),
    }
    println!(
        "Serial output: {:?}",
        String::from_utf8_lossy(sys.serial().writer())
    );
    println!("{}", sys.registers());
    match serde_json::to_string_pretty(&sys.save_state()) {
        Ok(state) => println!("Save-state: {}", state),
        Err(e) => eprintln!("Cannot serialize state: {}", e),
    }
}
