use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use px86_core::cpu_i386::{CpuI386, OpcodeTable, BOOT_LOAD_ADDRESS, EAX};
use px86_core::io::NullPorts;

/// Sum 1..=limit into EAX, then jump to address 0
fn counting_loop(limit: u32) -> Vec<u8> {
    let mut code = vec![
        0xB8, 0x00, 0x00, 0x00, 0x00, // 7C00: MOV EAX, 0
        0xB9, 0x01, 0x00, 0x00, 0x00, // 7C05: MOV ECX, 1
        0xBA, // 7C0A: MOV EDX, limit
    ];
    code.extend_from_slice(&limit.to_le_bytes());
    code.extend_from_slice(&[
        0x01, 0xC8, // 7C0F: ADD EAX, ECX
        0xFF, 0xC1, // 7C11: INC ECX
        0x3B, 0xCA, // 7C13: CMP ECX, EDX
        0x7E, 0xF8, // 7C15: JLE 7C0F
    ]);
    // 7C17: JMP 0
    let rel = 0u32.wrapping_sub(BOOT_LOAD_ADDRESS + code.len() as u32 + 5);
    code.push(0xE9);
    code.extend_from_slice(&rel.to_le_bytes());
    code
}

fn boot_cpu(program: &[u8]) -> CpuI386 {
    let mut cpu = CpuI386::new(0x10000, BOOT_LOAD_ADDRESS, BOOT_LOAD_ADDRESS);
    cpu.memory
        .load(BOOT_LOAD_ADDRESS, program)
        .expect("program fits in 64 KiB");
    cpu
}

fn bench_cpu_step(c: &mut Criterion) {
    let table = OpcodeTable::new();
    let program = counting_loop(10);

    c.bench_function("cpu_i386_single_instruction", |b| {
        b.iter(|| {
            let mut cpu = boot_cpu(&program);
            let _ = cpu.step(&table, &mut NullPorts);
            black_box(cpu.read_register32(EAX));
        });
    });
}

fn bench_counting_loop(c: &mut Criterion) {
    let table = OpcodeTable::new();
    let mut group = c.benchmark_group("cpu_i386_counting_loop");

    for limit in [10u32, 100, 1000].iter() {
        let program = counting_loop(*limit);
        group.bench_with_input(BenchmarkId::from_parameter(limit), limit, |b, _| {
            b.iter(|| {
                let mut cpu = boot_cpu(&program);
                let _ = cpu.run(&table, &mut NullPorts);
                black_box(cpu.read_register32(EAX));
            });
        });
    }

    group.finish();
}

fn bench_table_build(c: &mut Criterion) {
    c.bench_function("cpu_i386_opcode_table", |b| {
        b.iter(|| black_box(OpcodeTable::new().implemented_count()));
    });
}

criterion_group!(benches, bench_cpu_step, bench_counting_loop, bench_table_build);
criterion_main!(benches);
