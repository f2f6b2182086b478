// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Round-trips every persistable container through a real file: the
//! envelope (GUID + header) plus caller-supplied element codecs, with the
//! container's own equality as the oracle.

use libcoll_containers::storage::{decode_varint, encode_varint};
use libcoll_containers::{
    BitString, Collection, ContainerError, Dictionary, Flags, List, SList, SearchTree, Sequential,
    Vector,
};
use std::io::{Read, Seek, SeekFrom, Write};

fn reopen(mut file: std::fs::File) -> std::fs::File {
    file.seek(SeekFrom::Start(0)).unwrap();
    file
}

#[test]
fn vector_file_roundtrip() {
    let mut vector: Vector<u64> = (0..100).collect();
    vector.set_flags(Flags::READONLY);

    let mut file = tempfile::tempfile().unwrap();
    vector
        .save(&mut file, &mut |v, w| encode_varint(*v, w))
        .unwrap();
    file.flush().unwrap();

    let mut file = reopen(file);
    let back = Vector::<u64>::load(&mut file, Ord::cmp, &mut |r| decode_varint(r)).unwrap();
    assert!(vector.equal(&back));
    assert_eq!(Flags::READONLY, back.flags());
}

#[test]
fn list_and_slist_file_roundtrip() {
    let list: List<u64> = (10..30).collect();
    let slist: SList<u64> = (30..40).collect();

    let mut file = tempfile::tempfile().unwrap();
    list.save(&mut file, &mut |v, w| encode_varint(*v, w))
        .unwrap();
    slist
        .save(&mut file, &mut |v, w| encode_varint(*v, w))
        .unwrap();

    let mut file = reopen(file);
    let list_back = List::<u64>::load(&mut file, Ord::cmp, &mut |r| decode_varint(r)).unwrap();
    let slist_back = SList::<u64>::load(&mut file, Ord::cmp, &mut |r| decode_varint(r)).unwrap();
    assert!(list.equal(&list_back));
    assert!(slist.equal(&slist_back));
}

#[test]
fn dictionary_file_roundtrip() {
    let mut dictionary: Dictionary<u64> = Dictionary::new();
    for i in 0..64u64 {
        dictionary.add(&format!("key-{i}"), i * i).unwrap();
    }

    let mut file = tempfile::tempfile().unwrap();
    dictionary
        .save(&mut file, &mut |v, w| encode_varint(*v, w))
        .unwrap();

    let mut file = reopen(file);
    let back = Dictionary::<u64>::load(&mut file, &mut |r| decode_varint(r)).unwrap();
    assert!(dictionary.equal(&back));
    assert_eq!(Some(&(63 * 63)), back.get("key-63"));
}

#[test]
fn searchtree_file_roundtrip() {
    let mut tree: SearchTree<u64> = (0..200).collect();
    tree.erase(&77).unwrap();
    tree.hide(&13).unwrap();

    let mut file = tempfile::tempfile().unwrap();
    tree.save(&mut file, &mut |v, w| encode_varint(*v, w))
        .unwrap();

    let mut file = reopen(file);
    let back = SearchTree::<u64>::load(&mut file, Ord::cmp, &mut |r| decode_varint(r)).unwrap();
    assert!(tree.equal(&back));
    assert!(back.is_balanced());
    assert!(!back.contains(&13));
    assert!(!back.contains(&77));
}

#[test]
fn bitstring_file_roundtrip() {
    let bits: BitString = "0b1011 0011 1110 0000 001".parse().unwrap();
    let mut file = tempfile::tempfile().unwrap();
    bits.save(&mut file).unwrap();

    let mut file = reopen(file);
    let back = BitString::load(&mut file).unwrap();
    assert!(bits.equal(&back));
    assert_eq!(bits.population_count(), back.population_count());
}

#[test]
fn wrong_container_kind_is_rejected() {
    let vector: Vector<u64> = (0..5).collect();
    let mut buf = Vec::new();
    vector
        .save(&mut buf, &mut |v, w| encode_varint(*v, w))
        .unwrap();

    let err = SList::<u64>::load(&mut buf.as_slice(), Ord::cmp, &mut |r| decode_varint(r))
        .unwrap_err();
    assert_eq!(ContainerError::WrongFile, err);

    let err = BitString::load(&mut buf.as_slice()).unwrap_err();
    assert_eq!(ContainerError::WrongFile, err);
}

#[test]
fn truncated_stream_is_a_read_error() {
    let vector: Vector<u64> = (0..5).collect();
    let mut buf = Vec::new();
    vector
        .save(&mut buf, &mut |v, w| encode_varint(*v, w))
        .unwrap();
    buf.truncate(buf.len() - 2);

    let err = Vector::<u64>::load(&mut buf.as_slice(), Ord::cmp, &mut |r| decode_varint(r))
        .unwrap_err();
    assert_eq!(ContainerError::FileRead, err);
}

#[test]
fn string_elements_roundtrip() {
    let mut names: Vector<String> = Vector::new();
    for name in ["stack", "queue", "deque", ""] {
        names.add(name.to_string()).unwrap();
    }

    let mut file = tempfile::tempfile().unwrap();
    names
        .save(&mut file, &mut |s: &String, w: &mut dyn Write| {
            encode_varint(s.len() as u64, w)?;
            w.write_all(s.as_bytes())
        })
        .unwrap();

    let mut file = reopen(file);
    let back = Vector::<String>::load(&mut file, Ord::cmp, &mut |r: &mut dyn Read| {
        let len = decode_varint(r)? as usize;
        let mut bytes = vec![0u8; len];
        r.read_exact(&mut bytes)?;
        String::from_utf8(bytes).map_err(std::io::Error::other)
    })
    .unwrap();
    assert!(names.equal(&back));
}
