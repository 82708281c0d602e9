// SPDX-License-Identifier: MIT

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use umsfs::fat32::*;
use umsfs::fs::fat32::fat::FatTable;
use umsfs::stream::{CacheConfig, ReadOutcome, playback_stream};

const VOLUME: u64 = 8 << 20;
const CLUSTER: u32 = 512;

fn format(label: Option<&str>) -> (Vec<u8>, Fat32Meta) {
    let meta = Fat32Meta::new_custom(VOLUME, label, 0x1234_5678, 512, CLUSTER).unwrap();
    let mut io = MemBlockIO::new(vec![0u8; VOLUME as usize]);
    Fat32Formatter::new(&mut io, &meta).format(false).unwrap();
    (io.into_inner(), meta)
}

fn pattern(len: usize, seed: usize) -> Vec<u8> {
    (0..len).map(|i| ((i + seed) * 31 % 251) as u8).collect()
}

fn put<IO: BlockIO>(fs: &mut Fat32FileSystem<IO>, dir: &Fat32Node, name: &str, data: &[u8]) -> Fat32Node {
    let node = fs.create_file(dir, name).unwrap();
    let mut file = fs.open(&node).unwrap();
    fs.write(&mut file, 0, data).unwrap();
    let node = file.node().clone();
    fs.close_file(file).unwrap();
    node
}

fn remount(fs: Fat32FileSystem<MemBlockIO<Vec<u8>>>) -> Fat32FileSystem<MemBlockIO<Vec<u8>>> {
    let img = fs.into_inner().unwrap().into_inner();
    Fat32FileSystem::mount(MemBlockIO::new(img)).unwrap()
}

#[test]
fn finds_track_in_subfolder_after_remount() {
    let (img, _) = format(Some("MUSIC"));
    let mut fs = Fat32FileSystem::mount(MemBlockIO::new(img)).unwrap();
    let root = fs.root();
    let folder = fs.create_directory(&root, "folder1").unwrap();
    let data = pattern(3000, 1);
    put(&mut fs, &folder, "track1.mp3", &data);

    let mut fs = remount(fs);
    assert_eq!(fs.volume_label().unwrap(), "MUSIC");

    let node = fs.search("/folder1/track1.mp3").unwrap().expect("track present");
    assert_eq!(node.length, 3000);
    assert!(!node.is_dir());
    assert_eq!(node.name, "track1.mp3");

    let same = fs.search("/FOLDER1/Track1.MP3").unwrap().expect("case-insensitive match");
    assert_eq!(same.first_cluster, node.first_cluster);

    let mut file = fs.open(&node).unwrap();
    let mut out = vec![0u8; 3000];
    assert_eq!(fs.read(&mut file, 0, &mut out).unwrap(), 3000);
    assert_eq!(out, data);

    assert!(fs.search("/folder1/track2.mp3").unwrap().is_none());
}

#[test]
fn streamed_reads_match_direct_reads() {
    let (img, _) = format(None);
    let mut fs = Fat32FileSystem::mount(MemBlockIO::new(img)).unwrap();
    let chunk = fs.chunk_size();
    let root = fs.root();
    let data = pattern(2 * chunk, 7);
    let node = put(&mut fs, &root, "song.flac", &data);

    let fs = Rc::new(RefCell::new(fs));
    let mut stream = playback_stream(&fs, &node, &CacheConfig::default()).unwrap();
    assert_eq!(stream.chunk_size(), chunk);
    assert_eq!(stream.size(), data.len() as u64);

    let mut a = [0u8; 100];
    assert_eq!(stream.read(0, &mut a), ReadOutcome::Read(100));
    assert_eq!(&a[..], &data[..100]);

    let at = (chunk - 50) as u64;
    let mut b = [0u8; 100];
    assert_eq!(stream.read(at, &mut b), ReadOutcome::Read(100));
    assert_eq!(&b[..], &data[chunk - 50..chunk + 50]);

    let mut direct = [0u8; 100];
    let mut file = fs.borrow_mut().open(&node).unwrap();
    fs.borrow_mut().read(&mut file, at, &mut direct).unwrap();
    assert_eq!(b, direct);

    assert_eq!(stream.read(data.len() as u64, &mut b), ReadOutcome::EndOfStream);
}

#[test]
fn cached_playback_reads_each_cluster_once() {
    let (img, _) = format(None);
    let mut fs = Fat32FileSystem::mount(MemBlockIO::new(img)).unwrap();
    let root = fs.root();
    let data = pattern(4 * CLUSTER as usize, 3);
    put(&mut fs, &root, "a.wav", &data);
    let img = fs.into_inner().unwrap().into_inner();

    let reads = |cached: bool| {
        let mut mem = MemBlockIO::new(img.clone());
        let mut fs = Fat32FileSystem::mount(IOCounter::new(&mut mem)).unwrap();
        let node = fs.search("/a.wav").unwrap().unwrap();
        let mut buf = [0u8; 64];
        let steps = data.len() / buf.len();
        let fs = if cached {
            let fs = Rc::new(RefCell::new(fs));
            let mut stream = playback_stream(&fs, &node, &CacheConfig::default()).unwrap();
            for i in 0..steps {
                let pos = (i * buf.len()) as u64;
                assert_eq!(stream.read(pos, &mut buf), ReadOutcome::Read(64));
                assert_eq!(&buf[..], &data[pos as usize..pos as usize + 64]);
            }
            drop(stream);
            Rc::try_unwrap(fs).ok().unwrap().into_inner()
        } else {
            let mut file = fs.open(&node).unwrap();
            for i in 0..steps {
                fs.read(&mut file, (i * buf.len()) as u64, &mut buf).unwrap();
            }
            fs
        };
        let stats = fs.into_inner().unwrap().snapshot();
        stats.reads
    };

    let direct = reads(false);
    let cached = reads(true);
    // 32 small reads against 4 cluster fills.
    assert!(cached + 20 <= direct, "cached {cached}, direct {direct}");
}

#[test]
fn chain_length_follows_file_length() {
    let (img, _) = format(None);
    let mut fs = Fat32FileSystem::mount(MemBlockIO::new(img)).unwrap();
    let root = fs.root();
    let sizes = [0usize, 1, 512, 513, 5000];
    for (i, &len) in sizes.iter().enumerate() {
        put(&mut fs, &root, &format!("f{i}.bin"), &pattern(len, i));
    }

    let node = fs.search("/f4.bin").unwrap().unwrap();
    let mut file = fs.open(&node).unwrap();
    fs.set_length(&mut file, 1100).unwrap();
    fs.close_file(file).unwrap();

    let meta = fs.meta().clone();
    let mut io = fs.into_inner().unwrap();
    let mut fat = FatTable::default();
    let expect = [0u64, 1, 512, 513, 1100];
    for (i, &len) in expect.iter().enumerate() {
        let mut fs = Fat32FileSystem::mount(&mut io).unwrap();
        let node = fs.search(&format!("/f{i}.bin")).unwrap().unwrap();
        assert_eq!(node.length, len);
        drop(fs);
        let chain = fat.chain(&mut io, &meta, node.first_cluster).unwrap();
        assert_eq!(chain.len() as u32, meta.clusters_for(len), "f{i}.bin");
    }
}

#[test]
fn free_space_tracks_allocation() {
    let (img, _) = format(None);
    let mut fs = Fat32FileSystem::mount(MemBlockIO::new(img)).unwrap();
    let root = fs.root();
    let before = fs.free_space().unwrap();
    assert!(before > 0 && before < fs.capacity());

    let node = put(&mut fs, &root, "five.bin", &pattern(5 * CLUSTER as usize, 0));
    assert_eq!(fs.free_space().unwrap(), before - 5 * CLUSTER as u64);

    fs.delete(&node).unwrap();
    assert_eq!(fs.free_space().unwrap(), before);

    // The count survives a remount through FSInfo or a fresh scan.
    let mut fs = remount(fs);
    assert_eq!(fs.free_space().unwrap(), before);
}

/// Fails data-region writes while armed.
struct FlakyIO {
    inner: MemBlockIO<Vec<u8>>,
    data_start: u64,
    armed: Rc<Cell<bool>>,
}

impl BlockIO for FlakyIO {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> BlockIOResult {
        if self.armed.get() && offset >= self.data_start {
            return Err(BlockIOError::Other("injected write failure"));
        }
        self.inner.write_at(offset, data)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult {
        self.inner.read_at(offset, buf)
    }

    fn flush(&mut self) -> BlockIOResult {
        self.inner.flush()
    }

    fn set_offset(&mut self, partition_offset: u64) -> u64 {
        self.inner.set_offset(partition_offset)
    }

    fn partition_offset(&self) -> u64 {
        self.inner.partition_offset()
    }
}

#[test]
fn failed_append_rolls_back_allocation() {
    let (img, meta) = format(None);
    let armed = Rc::new(Cell::new(false));
    let io = FlakyIO {
        inner: MemBlockIO::new(img),
        // Past the root directory cluster.
        data_start: meta.unit_offset(meta.root_cluster + 1),
        armed: Rc::clone(&armed),
    };
    let mut fs = Fat32FileSystem::mount(io).unwrap();
    let root = fs.root();
    let original = pattern(700, 5);
    let node = put(&mut fs, &root, "keep.bin", &original);
    let free = fs.free_space().unwrap();

    let mut file = fs.open(&node).unwrap();
    armed.set(true);
    let err = fs.write(&mut file, 700, &pattern(3000, 9)).unwrap_err();
    assert!(matches!(err, FsError::IO(_)), "{err:?}");
    armed.set(false);

    assert_eq!(file.len(), 700);
    assert_eq!(fs.free_space().unwrap(), free);

    let mut out = vec![0u8; 700];
    assert_eq!(fs.read(&mut file, 0, &mut out).unwrap(), 700);
    assert_eq!(out, original);

    // The file still grows normally afterwards.
    assert_eq!(fs.write(&mut file, 700, &[1u8; 100]).unwrap(), 100);
    assert_eq!(file.len(), 800);
}

#[test]
fn broken_long_name_falls_back_to_short_name() {
    let (img, meta) = format(None);
    let mut fs = Fat32FileSystem::mount(MemBlockIO::new(img)).unwrap();
    let root = fs.root();
    put(&mut fs, &root, "Long File Name.txt", b"hello");
    let mut img = fs.into_inner().unwrap().into_inner();

    // No label entry, so slot 0 of the root is the first long-name slot.
    let slot0 = meta.unit_offset(meta.root_cluster) as usize;
    assert_eq!(img[slot0 + 11], 0x0F);
    img[slot0 + 13] ^= 0xFF;

    let mut fs = Fat32FileSystem::mount(MemBlockIO::new(img)).unwrap();
    let root = fs.root();
    let names: Vec<String> = fs.list_files(&root).unwrap().into_iter().map(|n| n.name).collect();
    assert_eq!(names, vec!["LONGFI~1.TXT".to_string()]);
    let node = fs.search("/longfi~1.txt").unwrap().expect("short name lookup");
    assert_eq!(node.length, 5);
}

#[test]
fn image_file_round_trip_through_std_io() {
    let (img, _) = format(Some("DISK"));
    let mut tmp = tempfile::tempfile().unwrap();
    std::io::Write::write_all(&mut tmp, &img).unwrap();

    {
        let mut fs = Fat32FileSystem::mount(StdBlockIO::new(&mut tmp)).unwrap();
        let root = fs.root();
        let dir = fs.create_directory(&root, "Podcasts").unwrap();
        put(&mut fs, &dir, "episode 01.m4a", &pattern(1500, 2));
        fs.close().unwrap();
    }

    let mut fs = Fat32FileSystem::mount(StdBlockIO::new(&mut tmp)).unwrap();
    let node = fs.search("/podcasts/EPISODE 01.m4a").unwrap().unwrap();
    assert_eq!(node.length, 1500);
    let dir = fs.parent(&node).unwrap().unwrap();
    assert_eq!(dir.name, "Podcasts");
}
