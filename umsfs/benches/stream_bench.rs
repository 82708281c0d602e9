// cargo bench -p umsfs --features mem
use std::cell::RefCell;
use std::rc::Rc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use umsfs::fat32::*;
use umsfs::stream::{CacheConfig, playback_stream};

criterion_group!(benches, bench_small_reads);
criterion_main!(benches);

const VOLUME: u64 = 16 << 20;
const FILE_LEN: usize = 1 << 20;

fn make_volume(cluster: u32) -> (Fat32FileSystem<MemBlockIO<Vec<u8>>>, Fat32Node) {
    let meta = Fat32Meta::new_custom(VOLUME, Some("BENCH"), 1, 512, cluster).unwrap();
    let mut io = MemBlockIO::new(vec![0u8; VOLUME as usize]);
    Fat32Formatter::new(&mut io, &meta).format(false).unwrap();
    let mut fs = Fat32FileSystem::mount(io).unwrap();
    let root = fs.root();
    let node = fs.create_file(&root, "track.mp3").unwrap();
    let mut f = fs.open(&node).unwrap();
    let data: Vec<u8> = (0..FILE_LEN).map(|i| i as u8).collect();
    fs.write(&mut f, 0, &data).unwrap();
    let node = f.node().clone();
    fs.close_file(f).unwrap();
    (fs, node)
}

fn bench_small_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_4k_reads");
    group.throughput(Throughput::Bytes(FILE_LEN as u64));
    for cluster in [4096u32, 32768] {
        let (fs, node) = make_volume(cluster);
        let fs = Rc::new(RefCell::new(fs));

        group.bench_with_input(BenchmarkId::new("direct", cluster), &node, |b, node| {
            b.iter(|| {
                let mut fs = fs.borrow_mut();
                let mut f = fs.open(node).unwrap();
                let mut buf = [0u8; 4096];
                let mut pos = 0u64;
                while pos < FILE_LEN as u64 {
                    pos += fs.read(&mut f, pos, &mut buf).unwrap() as u64;
                }
            })
        });

        group.bench_with_input(BenchmarkId::new("cached", cluster), &node, |b, node| {
            b.iter(|| {
                let mut stream = playback_stream(&fs, node, &CacheConfig::default()).unwrap();
                let mut buf = [0u8; 4096];
                let mut pos = 0u64;
                while let Some(n) = stream.read(pos, &mut buf).bytes() {
                    pos += n as u64;
                }
            })
        });
    }
    group.finish();
}
