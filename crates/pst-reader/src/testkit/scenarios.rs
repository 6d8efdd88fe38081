//! End-to-end scenarios over synthetic images.

use sha2::{Digest, Sha256};
use std::io::Cursor;

use super::*;
use crate::messaging::properties::PropertySource;
use crate::ndb::header::CryptMethod;
use crate::{BodyFormat, Error, FileVariant, PstFile, RecipientKind, Result};

const PT_I32: u16 = 0x0003;
const PT_BOOL: u16 = 0x000B;
const PT_OBJECT: u16 = 0x000D;
const PT_UNICODE: u16 = 0x001F;
const PT_TIME: u16 = 0x0040;
const PT_BINARY: u16 = 0x0102;

fn open_image(image: Vec<u8>, password: Option<&str>) -> Result<PstFile> {
    PstFile::open_source(Box::new(Cursor::new(image)), password)
}

/// Register the message-store node with a display name plus `extra` props.
fn add_store(builder: &mut ImageBuilder, extra: Vec<(u16, u16, PcValue)>) {
    let mut props = vec![(
        0x3001,
        PT_UNICODE,
        PcValue::Heap(utf16("Personal Folders")),
    )];
    props.extend(extra);
    let block = builder.data_block(&pc_block(props));
    builder.node(0x21, block, 0);
}

/// Register a folder node's property context.
fn add_folder(builder: &mut ImageBuilder, nid: u32, name: &str, count: i32, unread: i32) {
    let block = builder.data_block(&pc_block(vec![
        (0x3001, PT_UNICODE, PcValue::Heap(utf16(name))),
        (0x3602, PT_I32, PcValue::Inline(count as u32)),
        (0x3603, PT_I32, PcValue::Inline(unread as u32)),
        (0x360A, PT_BOOL, PcValue::Inline(0)),
    ]));
    builder.node(nid, block, 0);
}

fn rowid_column() -> Vec<TcColumn> {
    vec![TcColumn {
        tag: 0x67F2_0003,
        offset: 0,
        size: 4,
        bit: 0,
    }]
}

/// A table whose rows are bare row ids, the shape hierarchy and contents
/// tables take here.
fn id_table(builder: &mut ImageBuilder, nid: u32, ids: &[u32]) {
    let rows: Vec<(u32, Vec<u8>)> = ids
        .iter()
        .map(|id| {
            let mut row = id.to_le_bytes().to_vec();
            row.push(0x80);
            (*id, row)
        })
        .collect();
    let block = builder.data_block(&tc_block(&rowid_column(), [4, 4, 4, 5], &rows, Vec::new()));
    builder.node(nid, block, 0);
}

const ROOT_FOLDER: u32 = 0x122;
/// Hierarchy/contents NIDs sit at the folder's index under their own types.
fn sibling(nid: u32, id_type: u32) -> u32 {
    (nid & !0x1F) | id_type
}

#[test]
fn empty_store() {
    let mut builder = ImageBuilder::new(CryptMethod::None);
    add_store(&mut builder, Vec::new());
    add_folder(&mut builder, ROOT_FOLDER, "", 0, 0);

    let pst = open_image(builder.build(), None).unwrap();
    assert_eq!(pst.variant(), FileVariant::Unicode);
    assert_eq!(pst.display_name().as_deref(), Some("Personal Folders"));

    let root = pst.root_folder().unwrap();
    assert_eq!(root.path(), "/");
    assert!(root.folders().unwrap().is_empty());
    assert!(root.messages().unwrap().is_empty());
    assert_eq!(root.message_count().unwrap(), 0);
    assert_eq!(root.associated_count().unwrap(), 0);
}

#[test]
fn store_properties_enumerate_in_tag_order() {
    let mut builder = ImageBuilder::new(CryptMethod::None);
    add_store(
        &mut builder,
        vec![
            (0x0FF9, PT_BINARY, PcValue::Heap(vec![0xAB; 16])),
            (0x3416, PT_I32, PcValue::Inline(9)),
        ],
    );
    add_folder(&mut builder, ROOT_FOLDER, "", 0, 0);

    let pst = open_image(builder.build(), None).unwrap();
    let properties = pst.properties();

    let listed = properties.enumerate().unwrap();
    let ids: Vec<u16> = listed.iter().map(|(tag, _)| tag.id).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);

    // contains(tag) matches get(tag) for every listed property.
    for (tag, value) in &listed {
        assert!(value.is_ok());
        assert!(properties.contains(*tag).unwrap());
        assert!(properties.get(*tag).unwrap().is_some());
    }
    assert!(properties.get_id(0x6FFF).unwrap().is_none());
}

/// 2009-06-01 12:00:00 UTC as a FILETIME.
const RECEIVED: i64 = (1_243_857_600 + 11_644_473_600) * 10_000_000;

fn message_props(subject: &str, sender: &str) -> Vec<(u16, u16, PcValue)> {
    vec![
        (0x0037, PT_UNICODE, PcValue::Heap(utf16(subject))),
        (0x0C1A, PT_UNICODE, PcValue::Heap(utf16(sender))),
        (
            0x0E06,
            PT_TIME,
            PcValue::Heap(RECEIVED.to_le_bytes().to_vec()),
        ),
    ]
}

/// Two messages in an Inbox under the root, stored with the Permute cipher.
fn inbox_image() -> Vec<u8> {
    let mut builder = ImageBuilder::new(CryptMethod::Permute);
    add_store(&mut builder, Vec::new());
    add_folder(&mut builder, ROOT_FOLDER, "", 0, 0);

    let inbox = (0x2D << 5) | 0x02;
    add_folder(&mut builder, inbox, "Inbox", 2, 1);
    id_table(&mut builder, sibling(ROOT_FOLDER, 0x0D), &[inbox]);

    let first = (0x100 << 5) | 0x04;
    let second = (0x101 << 5) | 0x04;
    for (nid, subject) in [(first, "Hello"), (second, "Bye")] {
        let block = builder.data_block(&pc_block(message_props(subject, "alice@example.com")));
        builder.node(nid, block, 0);
    }
    id_table(&mut builder, sibling(inbox, 0x0E), &[first, second]);

    builder.build()
}

#[test]
fn inbox_with_two_messages() {
    let pst = open_image(inbox_image(), None).unwrap();

    let folders = pst.root_folder().unwrap().folders().unwrap();
    assert_eq!(folders.len(), 1);
    let inbox = &folders[0];
    assert_eq!(inbox.display_name().unwrap(), "Inbox");
    assert_eq!(inbox.path(), "/Inbox");
    assert_eq!(inbox.message_count().unwrap(), 2);
    assert_eq!(inbox.unread_count().unwrap(), 1);

    let messages = inbox.messages().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].subject().unwrap(), "Hello");
    assert_eq!(messages[1].subject().unwrap(), "Bye");
    for message in &messages {
        assert_eq!(message.from().unwrap(), "alice@example.com");
        assert_eq!(
            message.received_time().unwrap().unwrap().to_rfc3339(),
            "2009-06-01T12:00:00+00:00"
        );
        assert!(message.submitted_time().unwrap().is_none());
        assert!(message.body().unwrap().is_none());
        assert!(message.recipients().unwrap().is_empty());
        assert!(message.attachments().unwrap().is_empty());
    }
}

#[test]
fn folder_traversal_is_acyclic() {
    let pst = open_image(inbox_image(), None).unwrap();

    let mut seen = Vec::new();
    let mut stack = vec![pst.root_folder().unwrap()];
    while let Some(folder) = stack.pop() {
        assert!(!seen.contains(&folder.node_id()), "folder visited twice");
        seen.push(folder.node_id());
        stack.extend(folder.folders().unwrap());
    }
    assert_eq!(seen.len(), 2);
}

#[test]
fn subject_prefix_marker_is_stripped() {
    let mut builder = ImageBuilder::new(CryptMethod::None);
    add_store(&mut builder, Vec::new());
    add_folder(&mut builder, ROOT_FOLDER, "", 1, 0);

    let message = (0x100 << 5) | 0x04;
    let block = builder.data_block(&pc_block(vec![(
        0x0037,
        PT_UNICODE,
        PcValue::Heap(utf16("\u{1}\u{5}RE: Hi")),
    )]));
    builder.node(message, block, 0);
    id_table(&mut builder, sibling(ROOT_FOLDER, 0x0E), &[message]);

    let pst = open_image(builder.build(), None).unwrap();
    let messages = pst.root_folder().unwrap().messages().unwrap();
    assert_eq!(messages[0].subject().unwrap(), "RE: Hi");
}

/// An LZFu stream of nothing but literal runs; no dictionary references.
fn lzfu_literals(body: &[u8]) -> Vec<u8> {
    let mut tokens = Vec::new();
    for chunk in body.chunks(8) {
        tokens.push(0_u8);
        tokens.extend_from_slice(chunk);
    }

    let mut data = Vec::new();
    data.extend_from_slice(&((tokens.len() as u32) + 12).to_le_bytes());
    data.extend_from_slice(&(body.len() as u32).to_le_bytes());
    data.extend_from_slice(&0x7546_5A4C_u32.to_le_bytes()); // LZFu
    data.extend_from_slice(&crate::crc::compute_crc(0, &tokens).to_le_bytes());
    data.extend_from_slice(&tokens);
    data
}

#[test]
fn rtf_body_is_decompressed() {
    let rtf = b"{\\rtf1\\ansi Hello}";

    let mut builder = ImageBuilder::new(CryptMethod::None);
    add_store(&mut builder, Vec::new());
    add_folder(&mut builder, ROOT_FOLDER, "", 1, 0);

    let message = (0x100 << 5) | 0x04;
    let block = builder.data_block(&pc_block(vec![(
        0x1009,
        PT_BINARY,
        PcValue::Heap(lzfu_literals(rtf)),
    )]));
    builder.node(message, block, 0);
    id_table(&mut builder, sibling(ROOT_FOLDER, 0x0E), &[message]);

    let pst = open_image(builder.build(), None).unwrap();
    let messages = pst.root_folder().unwrap().messages().unwrap();
    let body = messages[0].body().unwrap().unwrap();
    assert_eq!(body.format(), BodyFormat::Rtf);
    assert_eq!(body.bytes(), rtf);
    assert_eq!(body.text().unwrap(), "{\\rtf1\\ansi Hello}");
}

#[test]
fn password_gate() {
    let stored = {
        let mut bytes = utf16("secret");
        bytes.extend_from_slice(&[0, 0]);
        crate::crc::compute_crc(0, &bytes)
    };

    let image = {
        let mut builder = ImageBuilder::new(CryptMethod::None);
        add_store(
            &mut builder,
            vec![(0x67FF, PT_I32, PcValue::Inline(stored))],
        );
        add_folder(&mut builder, ROOT_FOLDER, "", 0, 0);
        builder.build()
    };

    assert!(matches!(
        open_image(image.clone(), None),
        Err(Error::PasswordRequired)
    ));
    assert!(matches!(
        open_image(image.clone(), Some("Secret")),
        Err(Error::PasswordIncorrect)
    ));
    open_image(image, Some("secret")).unwrap();
}

#[test]
fn corrupt_block_poisons_only_its_node() {
    let mut builder = ImageBuilder::new(CryptMethod::None);
    add_store(&mut builder, Vec::new());
    add_folder(&mut builder, ROOT_FOLDER, "", 2, 0);

    let good = (0x100 << 5) | 0x04;
    let good_block = builder.data_block(&pc_block(vec![
        (0x0037, PT_UNICODE, PcValue::Heap(utf16("Good"))),
        (0x1000, PT_UNICODE, PcValue::Heap(utf16("fine body"))),
    ]));
    builder.node(good, good_block, 0);

    // The bad message's body lives behind a sub-node whose data block gets
    // its trailer CRC flipped.
    let bad = (0x101 << 5) | 0x04;
    let body_block = builder.data_block(&utf16("doomed body"));
    builder.corrupt_block_crc(body_block);
    let sub = builder.subnode_block(&[(0x41, body_block, 0)]);
    let bad_block = builder.data_block(&pc_block(vec![
        (0x0037, PT_UNICODE, PcValue::Heap(utf16("Bad"))),
        (0x1000, PT_UNICODE, PcValue::Node(0x41)),
    ]));
    builder.node(bad, bad_block, sub);

    id_table(&mut builder, sibling(ROOT_FOLDER, 0x0E), &[good, bad]);

    let pst = open_image(builder.build(), None).unwrap();
    let messages = pst.root_folder().unwrap().messages().unwrap();

    assert_eq!(messages[1].subject().unwrap(), "Bad");
    assert!(matches!(
        messages[1].body(),
        Err(Error::Corrupt("block crc"))
    ));

    // Unrelated nodes keep resolving on the same handle.
    let body = messages[0].body().unwrap().unwrap();
    assert_eq!(body.text().unwrap(), "fine body");
}

#[test]
fn recipients_project_from_the_recipient_table() {
    let mut builder = ImageBuilder::new(CryptMethod::None);
    add_store(&mut builder, Vec::new());
    add_folder(&mut builder, ROOT_FOLDER, "", 1, 0);

    let columns = vec![
        TcColumn {
            tag: 0x67F2_0003,
            offset: 0,
            size: 4,
            bit: 0,
        },
        TcColumn {
            tag: 0x3001_001F,
            offset: 4,
            size: 4,
            bit: 1,
        },
        TcColumn {
            tag: 0x0C15_0003,
            offset: 8,
            size: 4,
            bit: 2,
        },
    ];
    let mut row = Vec::new();
    row.extend_from_slice(&0_u32.to_le_bytes());
    row.extend_from_slice(&hid_of_alloc(0).to_le_bytes());
    row.extend_from_slice(&1_u32.to_le_bytes());
    row.push(0xE0);
    let table = tc_block(
        &columns,
        [12, 12, 12, 13],
        &[(0, row)],
        vec![utf16("Alice Example")],
    );
    let table_block = builder.data_block(&table);
    let sub = builder.subnode_block(&[(0x692, table_block, 0)]);

    let message = (0x100 << 5) | 0x04;
    let block = builder.data_block(&pc_block(message_props("With recipient", "bob")));
    builder.node(message, block, sub);
    id_table(&mut builder, sibling(ROOT_FOLDER, 0x0E), &[message]);

    let pst = open_image(builder.build(), None).unwrap();
    let messages = pst.root_folder().unwrap().messages().unwrap();
    let recipients = messages[0].recipients().unwrap();

    assert_eq!(recipients.len(), 1);
    assert_eq!(recipients[0].display_name(), "Alice Example");
    assert_eq!(recipients[0].kind(), RecipientKind::To);

    let listed = recipients[0].properties().enumerate().unwrap();
    assert!(listed.iter().any(|(tag, _)| tag.id == 0x3001));
    let ids: Vec<u16> = listed.iter().map(|(tag, _)| tag.id).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

/// Deterministic pseudo-random payload for the large-attachment scenario.
fn large_payload() -> Vec<u8> {
    let mut state = 0x2545_F491_4F6C_DD1D_u64;
    (0..2 * 1024 * 1024)
        .map(|_| {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            (state >> 56) as u8
        })
        .collect()
}

#[test]
fn xblock_attachment_round_trips() {
    let payload = large_payload();
    let expected_digest = Sha256::digest(&payload);

    let mut builder = ImageBuilder::new(CryptMethod::Cyclic);
    add_store(&mut builder, Vec::new());
    add_folder(&mut builder, ROOT_FOLDER, "", 1, 0);

    // Attachment payload: an XBLOCK-backed stream behind the attachment's
    // own sub-node tree.
    let stream = builder.stream(&payload);
    let attach_sub = builder.subnode_block(&[(0x41, stream, 0)]);
    let attach_pc = builder.data_block(&pc_block(vec![
        (0x0E20, PT_I32, PcValue::Inline(payload.len() as u32)),
        (0x3701, PT_BINARY, PcValue::Node(0x41)),
        (0x3705, PT_I32, PcValue::Inline(1)),
        (0x3707, PT_UNICODE, PcValue::Heap(utf16("payload.bin"))),
        (
            0x370E,
            PT_UNICODE,
            PcValue::Heap(utf16("application/octet-stream")),
        ),
    ]));

    let attachment_nid = (0x401 << 5) | 0x05;
    let table_block = builder.data_block(&tc_block(
        &rowid_column(),
        [4, 4, 4, 5],
        &[(attachment_nid, {
            let mut row = attachment_nid.to_le_bytes().to_vec();
            row.push(0x80);
            row
        })],
        Vec::new(),
    ));
    let message_sub = builder.subnode_block(&[
        (0x671, table_block, 0),
        (attachment_nid, attach_pc, attach_sub),
    ]);

    let message = (0x100 << 5) | 0x04;
    let block = builder.data_block(&pc_block(message_props("Big one", "carol")));
    builder.node(message, block, message_sub);
    id_table(&mut builder, sibling(ROOT_FOLDER, 0x0E), &[message]);

    let pst = open_image(builder.build(), None).unwrap();
    let messages = pst.root_folder().unwrap().messages().unwrap();
    let attachments = messages[0].attachments().unwrap();

    assert_eq!(attachments.len(), 1);
    let attachment = &attachments[0];
    assert_eq!(attachment.filename().unwrap(), "payload.bin");
    assert_eq!(
        attachment.mime_type().unwrap().as_deref(),
        Some("application/octet-stream")
    );
    assert_eq!(attachment.size().unwrap(), Some(payload.len() as i32));
    assert!(attachment.embedded_message().unwrap().is_none());

    let bytes = attachment.bytes().unwrap().unwrap();
    assert_eq!(bytes.len(), 2 * 1024 * 1024);
    assert_eq!(Sha256::digest(&bytes), expected_digest);
    assert_eq!(bytes, payload);
}

#[test]
fn embedded_message_attachment() {
    let mut builder = ImageBuilder::new(CryptMethod::None);
    add_store(&mut builder, Vec::new());
    add_folder(&mut builder, ROOT_FOLDER, "", 1, 0);

    let inner_nid = (0x200 << 5) | 0x04;
    let inner_pc = builder.data_block(&pc_block(message_props("Inner", "dave")));
    let attach_sub = builder.subnode_block(&[(inner_nid, inner_pc, 0)]);

    let mut object = Vec::new();
    object.extend_from_slice(&inner_nid.to_le_bytes());
    object.extend_from_slice(&64_u32.to_le_bytes());
    let attach_pc = builder.data_block(&pc_block(vec![
        (0x3701, PT_OBJECT, PcValue::Heap(object)),
        (0x3705, PT_I32, PcValue::Inline(5)),
    ]));

    let attachment_nid = (0x401 << 5) | 0x05;
    let table_block = builder.data_block(&tc_block(
        &rowid_column(),
        [4, 4, 4, 5],
        &[(attachment_nid, {
            let mut row = attachment_nid.to_le_bytes().to_vec();
            row.push(0x80);
            row
        })],
        Vec::new(),
    ));
    let message_sub = builder.subnode_block(&[
        (0x671, table_block, 0),
        (attachment_nid, attach_pc, attach_sub),
    ]);

    let message = (0x100 << 5) | 0x04;
    let block = builder.data_block(&pc_block(message_props("Outer", "erin")));
    builder.node(message, block, message_sub);
    id_table(&mut builder, sibling(ROOT_FOLDER, 0x0E), &[message]);

    let pst = open_image(builder.build(), None).unwrap();
    let messages = pst.root_folder().unwrap().messages().unwrap();
    let attachments = messages[0].attachments().unwrap();

    assert!(attachments[0].bytes().unwrap().is_none());
    let inner = attachments[0].embedded_message().unwrap().unwrap();
    assert_eq!(inner.subject().unwrap(), "Inner");
}

#[test]
fn close_disposes_every_derived_handle() {
    let pst = open_image(inbox_image(), None).unwrap();
    let root = pst.root_folder().unwrap();

    pst.close();
    assert!(matches!(root.folders(), Err(Error::Disposed)));
    assert!(matches!(pst.root_folder(), Err(Error::Disposed)));
}

#[test]
fn table_row_count_matches_rows() {
    let pst = open_image(inbox_image(), None).unwrap();
    let folders = pst.root_folder().unwrap().folders().unwrap();
    let inbox = &folders[0];
    // The contents table's row-index and row matrix agree.
    assert_eq!(inbox.messages().unwrap().len() as i32, inbox.message_count().unwrap());
}
