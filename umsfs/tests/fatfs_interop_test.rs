// SPDX-License-Identifier: MIT

use std::io::{Cursor, Read, Write};

use fatfs::{FatType, FileSystem, FormatVolumeOptions, FsOptions};
use umsfs::fat32::*;

const IMAGE: usize = 40 << 20;
const CLUSTER: u32 = 512;

fn pattern(len: usize, seed: usize) -> Vec<u8> {
    (0..len).map(|i| ((i ^ seed) * 13 % 251) as u8).collect()
}

fn fatfs_image() -> Cursor<Vec<u8>> {
    let mut cursor = Cursor::new(vec![0u8; IMAGE]);
    fatfs::format_volume(
        &mut cursor,
        FormatVolumeOptions::new()
            .fat_type(FatType::Fat32)
            .bytes_per_cluster(CLUSTER)
            .volume_label(*b"INTEROP    "),
    )
    .unwrap();
    cursor
}

fn fatfs_names(dir: &fatfs::Dir<'_, &mut Cursor<Vec<u8>>>) -> Vec<String> {
    let mut names: Vec<String> = dir
        .iter()
        .map(|e| e.unwrap().file_name())
        .filter(|n| n != "." && n != "..")
        .collect();
    names.sort();
    names
}

#[test]
fn reads_volume_written_by_fatfs() {
    let mut cursor = fatfs_image();
    let track = pattern(5000, 1);
    {
        let fs = FileSystem::new(&mut cursor, FsOptions::new()).unwrap();
        let root = fs.root_dir();
        let music = root.create_dir("Music").unwrap();
        let mut f = music.create_file("Track One.mp3").unwrap();
        f.write_all(&track).unwrap();
        drop(f);
        let mut f = root.create_file("README.TXT").unwrap();
        f.write_all(b"read me").unwrap();
        drop(f);
        drop(music);
        drop(root);
        fs.unmount().unwrap();
    }

    let mut fs = Fat32FileSystem::mount(MemBlockIO::new(cursor.into_inner())).unwrap();
    assert_eq!(fs.volume_label().unwrap(), "INTEROP");

    let root = fs.root();
    let mut names: Vec<String> = fs.list_files(&root).unwrap().into_iter().map(|n| n.name).collect();
    names.sort();
    assert_eq!(names, ["Music", "README.TXT"]);

    let node = fs.search("/music/track one.mp3").unwrap().expect("track present");
    assert_eq!(node.name, "Track One.mp3");
    assert_eq!(node.length, track.len() as u64);

    let mut file = fs.open(&node).unwrap();
    let mut out = vec![0u8; track.len()];
    assert_eq!(fs.read(&mut file, 0, &mut out).unwrap(), track.len());
    assert_eq!(out, track);

    // Root, the folder and both files hold at least 13 clusters.
    let free = fs.free_space().unwrap() / CLUSTER as u64;
    assert!(free + 13 <= fs.meta().cluster_count as u64);
}

#[test]
fn fatfs_reads_volume_written_here() {
    let meta = Fat32Meta::new_custom(IMAGE as u64, Some("UMSFS"), 0xCAFE_F00D, 512, CLUSTER).unwrap();
    let mut io = MemBlockIO::new(vec![0u8; IMAGE]);
    Fat32Formatter::new(&mut io, &meta).format(false).unwrap();

    let intro = pattern(3000, 2);
    let mut fs = Fat32FileSystem::mount(io).unwrap();
    let root = fs.root();
    let albums = fs.create_directory(&root, "Albums").unwrap();
    for (name, data) in [("Side A - Intro.ogg", &intro[..]), ("tmp.bin", &[0u8; 10][..])] {
        let node = fs.create_file(&albums, name).unwrap();
        let mut f = fs.open(&node).unwrap();
        fs.write(&mut f, 0, data).unwrap();
        fs.close_file(f).unwrap();
    }
    let tmp = fs.search("/Albums/tmp.bin").unwrap().unwrap();
    fs.delete(&tmp).unwrap();
    let notes = fs.create_file(&root, "notes.txt").unwrap();
    fs.rename(&notes, "Liner Notes.txt").unwrap();
    let free = fs.free_space().unwrap() / CLUSTER as u64;

    let mut cursor = Cursor::new(fs.into_inner().unwrap().into_inner());
    let fs = FileSystem::new(&mut cursor, FsOptions::new()).unwrap();
    assert_eq!(fs.fat_type(), FatType::Fat32);
    assert_eq!(fs.volume_label(), "UMSFS");

    let root = fs.root_dir();
    assert_eq!(fatfs_names(&root), ["Albums", "Liner Notes.txt"]);
    let albums = root.open_dir("Albums").unwrap();
    assert_eq!(fatfs_names(&albums), ["Side A - Intro.ogg"]);

    let mut out = Vec::new();
    root.open_file("Albums/Side A - Intro.ogg")
        .unwrap()
        .read_to_end(&mut out)
        .unwrap();
    assert_eq!(out, intro);

    assert_eq!(fs.stats().unwrap().free_clusters() as u64, free);
}

#[test]
fn changes_made_by_fatfs_are_visible_after_remount() {
    let meta = Fat32Meta::new_custom(IMAGE as u64, None, 7, 512, CLUSTER).unwrap();
    let mut io = MemBlockIO::new(vec![0u8; IMAGE]);
    Fat32Formatter::new(&mut io, &meta).format(false).unwrap();
    let mut fs = Fat32FileSystem::mount(io).unwrap();
    let root = fs.root();
    fs.create_directory(&root, "Shared").unwrap();

    let mut cursor = Cursor::new(fs.into_inner().unwrap().into_inner());
    {
        let fs = FileSystem::new(&mut cursor, FsOptions::new()).unwrap();
        let mut f = fs.root_dir().create_file("Shared/from fatfs.dat").unwrap();
        f.write_all(&pattern(2048, 3)).unwrap();
        drop(f);
        fs.unmount().unwrap();
    }

    let mut fs = Fat32FileSystem::mount(MemBlockIO::new(cursor.into_inner())).unwrap();
    let node = fs.search("/Shared/from fatfs.dat").unwrap().unwrap();
    assert_eq!(node.length, 2048);
    let parent = fs.parent(&node).unwrap().unwrap();
    assert_eq!(parent.name, "Shared");
}
