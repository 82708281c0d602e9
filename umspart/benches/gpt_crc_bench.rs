// cargo bench -p umspart --features mem
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use umsio::prelude::MemBlockIO;
use umspart::gpt::{self, GptEntry};
use umspart::guids::GPT_PARTITION_TYPE_BASIC_DATA;
use umspart::mbr::{self, Mbr};

criterion_group!(benches, bench_read_partition_table);
criterion_main!(benches);

const BS: u64 = 512;
const TOTAL: u64 = 1 << 16;

fn make_image(n: usize) -> Vec<u8> {
    let mut io = MemBlockIO::new(vec![0u8; (TOTAL * BS) as usize]);
    let entries: Vec<GptEntry> = (0..n)
        .map(|i| {
            let start = 2048 + (i as u64) * 256;
            GptEntry::new(GPT_PARTITION_TYPE_BASIC_DATA, [i as u8 + 1; 16], start, start + 255, "p")
        })
        .collect();
    mbr::write_mbr(&mut io, &Mbr::new_protective(TOTAL)).unwrap();
    gpt::write_gpt(&mut io, &entries, TOTAL, [0xAB; 16], BS).unwrap();
    io.into_inner()
}

fn bench_read_partition_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_partition_table");
    for n in [1usize, 16, 128] {
        let img = make_image(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &img, |b, img| {
            b.iter(|| {
                let mut io = MemBlockIO::new(img.clone());
                umspart::read_partition_table(&mut io, BS, TOTAL).unwrap()
            })
        });
    }
    group.finish();
}
