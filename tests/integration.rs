//! End-to-end tests over synthetic in-memory PDFs.

use lazypdf::crypt::{CryptDict, CryptFilter, CryptMethod, Decoder};
use lazypdf::error::PdfError;
use lazypdf::file::File;
use lazypdf::object::{NameTree, Object, PlainRef, Resolve};
use lazypdf::primitive::Primitive;
use std::collections::HashMap;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02X}", b)).collect()
}

fn unhex(s: &str) -> Vec<u8> {
    s.as_bytes()
        .chunks(2)
        .map(|pair| u8::from_str_radix(std::str::from_utf8(pair).unwrap(), 16).unwrap())
        .collect()
}

/// Appends `nr 0 obj <body> endobj` and returns its byte offset.
fn push_obj(data: &mut Vec<u8>, nr: u32, body: &str) -> usize {
    let offset = data.len();
    data.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", nr, body).as_bytes());
    offset
}

/// Appends a classical xref table (one subsection per entry plus the
/// free-list head) and its trailer, returning the table's offset.
fn push_xref_table(data: &mut Vec<u8>, entries: &[(u32, usize)], trailer_body: &str) -> usize {
    let xref_pos = data.len();
    data.extend_from_slice(b"xref\n0 1\n0000000000 65535 f \n");
    for &(nr, offset) in entries {
        data.extend_from_slice(format!("{} 1\n{:010} {:05} n \n", nr, offset, 0).as_bytes());
    }
    data.extend_from_slice(format!("trailer\n{}\n", trailer_body).as_bytes());
    xref_pos
}

fn push_footer(data: &mut Vec<u8>, xref_pos: usize) {
    data.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_pos).as_bytes());
}

/// A six-object document over a classical xref table.
fn minimal_pdf() -> Vec<u8> {
    let mut data = b"%PDF-1.4\n".to_vec();
    let mut entries = Vec::new();
    entries.push((1, push_obj(&mut data, 1, "<</Type/Catalog/Pages 2 0 R>>")));
    entries.push((2, push_obj(&mut data, 2, "<</Type/Pages/Kids[3 0 R]/Count 1>>")));
    entries.push((3, push_obj(&mut data, 3, "<</Type/Page/Parent 2 0 R/Contents 4 0 R>>")));
    entries.push((4, push_obj(&mut data, 4, "<</Length 5 0 R>>\nstream\nBT ET\nendstream")));
    entries.push((5, push_obj(&mut data, 5, "5")));
    entries.push((6, push_obj(&mut data, 6, "[(a string) /Name 1 2.5 <4E6F7>]")));
    let xref_pos = push_xref_table(&mut data, &entries, "<</Size 7/Root 1 0 R>>");
    push_footer(&mut data, xref_pos);
    data
}

#[test]
fn empty_input_is_a_clean_error() {
    assert!(File::from_data(Vec::new()).is_err());
}

#[test]
fn truncated_garbage_is_a_clean_error() {
    assert!(File::from_data(b"%PDF-1.4\nhello".to_vec()).is_err());
    assert!(File::from_data(b"not a pdf".to_vec()).is_err());
}

#[test]
fn minimal_xref_resolves_every_object() {
    init_logger();
    let file = File::from_data(minimal_pdf()).unwrap();

    assert_eq!(file.version(), "1.4");
    let ids: Vec<u64> = file.xref().iter().collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);

    for id in ids {
        let obj = file.resolve(PlainRef { id, gen: 0 }).unwrap();
        assert_ne!(obj.get_debug_name(), "Null");
    }
    assert_eq!(
        file.trailer().get("Root").unwrap().as_reference().unwrap(),
        PlainRef { id: 1, gen: 0 }
    );
}

#[test]
fn strings_decode_to_raw_bytes() {
    let file = File::from_data(minimal_pdf()).unwrap();
    let array = file
        .resolve(PlainRef { id: 6, gen: 0 })
        .unwrap()
        .into_array()
        .unwrap();
    assert_eq!(array[0].as_string().unwrap().as_bytes(), b"a string");
    // odd-length hex string pads a trailing zero nibble
    assert_eq!(array[4].as_string().unwrap().as_bytes(), &[0x4e, 0x6f, 0x70]);
}

#[test]
fn stream_length_resolves_through_a_reference() {
    let file = File::from_data(minimal_pdf()).unwrap();
    let stream = file
        .resolve(PlainRef { id: 4, gen: 0 })
        .unwrap()
        .into_stream()
        .unwrap();
    // the body is lazy: fetched now, and re-fetched on every call
    assert_eq!(file.stream_data(&stream).unwrap(), b"BT ET");
    assert_eq!(file.stream_data(&stream).unwrap(), b"BT ET");
    assert_eq!(file.raw_stream_data(&stream).unwrap(), b"BT ET");
}

#[test]
fn repeated_resolution_is_memoized() {
    let file = File::from_data(minimal_pdf()).unwrap();
    let r = PlainRef { id: 5, gen: 0 };
    let first = file.resolve(r).unwrap();
    let second = file.resolve(r).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, Primitive::Integer(5));
}

#[test]
fn wrong_generation_does_not_resolve() {
    let file = File::from_data(minimal_pdf()).unwrap();
    assert!(file.resolve(PlainRef { id: 5, gen: 3 }).is_err());
}

#[test]
fn incremental_update_shadows_older_generations() {
    // original document
    let mut data = b"%PDF-1.5\n".to_vec();
    let mut entries = Vec::new();
    entries.push((1, push_obj(&mut data, 1, "<</Type/Catalog>>")));
    entries.push((2, push_obj(&mut data, 2, "(original)")));
    entries.push((3, push_obj(&mut data, 3, "(doomed)")));
    let first_xref = push_xref_table(&mut data, &entries, "<</Size 4/Root 1 0 R>>");
    push_footer(&mut data, first_xref);

    // incremental update: object 2 rewritten, object 3 freed
    let updated = push_obj(&mut data, 2, "(updated)");
    let second_xref = data.len();
    data.extend_from_slice(b"xref\n2 1\n");
    data.extend_from_slice(format!("{:010} {:05} n \n", updated, 0).as_bytes());
    data.extend_from_slice(b"3 1\n0000000000 00001 f \n");
    data.extend_from_slice(
        format!("trailer\n<</Size 4/Root 1 0 R/Prev {}>>\n", first_xref).as_bytes(),
    );
    push_footer(&mut data, second_xref);

    let file = File::from_data(data).unwrap();
    let s = file
        .resolve(PlainRef { id: 2, gen: 0 })
        .unwrap()
        .into_string()
        .unwrap();
    assert_eq!(s.as_bytes(), b"updated");
    assert!(matches!(
        file.resolve(PlainRef { id: 3, gen: 0 }),
        Err(PdfError::FreeObject { obj_nr: 3 })
    ));
    // the freed slot no longer shows up when iterating
    assert_eq!(file.xref().iter().collect::<Vec<_>>(), vec![1, 2]);
}

/// Builds an xref stream object with `/W [1 2 1]` records.
fn push_xref_stream(
    data: &mut Vec<u8>,
    nr: u32,
    size: u32,
    records: &[(u8, u16, u8)],
    trailer_extra: &str,
) -> usize {
    let mut body = Vec::new();
    for &(t, f2, f3) in records {
        body.push(t);
        body.extend_from_slice(&f2.to_be_bytes());
        body.push(f3);
    }
    let dict = format!(
        "<</Type/XRef/Size {}/W[1 2 1]/Length {}{}>>",
        size,
        body.len(),
        trailer_extra
    );
    let offset = data.len();
    data.extend_from_slice(format!("{} 0 obj\n{}\nstream\n", nr, dict).as_bytes());
    data.extend_from_slice(&body);
    data.extend_from_slice(b"\nendstream\nendobj\n");
    offset
}

#[test]
fn xref_stream_file_resolves() {
    let mut data = b"%PDF-1.5\n".to_vec();
    let catalog = push_obj(&mut data, 1, "<</Type/Catalog>>") as u16;
    let value = push_obj(&mut data, 2, "(via xref stream)") as u16;
    let xref_pos = data.len();
    push_xref_stream(
        &mut data,
        3,
        4,
        &[
            (0, 0, 0),
            (1, catalog, 0),
            (1, value, 0),
            (1, xref_pos as u16, 0),
        ],
        "/Root 1 0 R",
    );
    push_footer(&mut data, xref_pos);

    let file = File::from_data(data).unwrap();
    assert_eq!(
        file.resolve(PlainRef { id: 2, gen: 0 })
            .unwrap()
            .into_string()
            .unwrap()
            .as_bytes(),
        b"via xref stream"
    );
    assert_eq!(
        file.trailer().get("Root").unwrap().as_reference().unwrap(),
        PlainRef { id: 1, gen: 0 }
    );
}

#[test]
fn object_stream_members_resolve() {
    let mut data = b"%PDF-1.5\n".to_vec();
    let catalog = push_obj(&mut data, 1, "<</Type/Catalog>>") as u16;

    // objects 2 and 3 live compressed inside object stream 4
    let first_member = "<</Kind/Compressed>>";
    let second_member = "(inside an object stream)";
    let prefix = format!("2 0 3 {} ", first_member.len());
    let objstm_body = format!("{}{}{}", prefix, first_member, second_member);
    let objstm = push_obj(
        &mut data,
        4,
        &format!(
            "<</Type/ObjStm/N 2/First {}/Length {}>>\nstream\n{}\nendstream",
            prefix.len(),
            objstm_body.len(),
            objstm_body
        ),
    ) as u16;

    let xref_pos = data.len();
    push_xref_stream(
        &mut data,
        5,
        6,
        &[
            (0, 0, 0),
            (1, catalog, 0),
            (2, 4, 0), // object 2: stream 4, index 0
            (2, 4, 1), // object 3: stream 4, index 1
            (1, objstm, 0),
            (1, xref_pos as u16, 0),
        ],
        "/Root 1 0 R",
    );
    push_footer(&mut data, xref_pos);

    let file = File::from_data(data).unwrap();
    let dict = file
        .resolve(PlainRef { id: 2, gen: 0 })
        .unwrap()
        .into_dictionary()
        .unwrap();
    assert_eq!(dict.get("Kind").unwrap().as_name().unwrap(), "Compressed");
    let s = file
        .resolve(PlainRef { id: 3, gen: 0 })
        .unwrap()
        .into_string()
        .unwrap();
    assert_eq!(s.as_bytes(), b"inside an object stream");
}

#[test]
fn hybrid_file_consults_the_xref_stream() {
    let mut data = b"%PDF-1.4\n".to_vec();
    let catalog = push_obj(&mut data, 1, "<</Type/Catalog>>");
    let hidden = push_obj(&mut data, 2, "(only in the xref stream)") as u16;

    // an xref stream that knows about object 2
    let stm_pos = data.len();
    push_xref_stream(
        &mut data,
        3,
        4,
        &[(0, 0, 0), (0, 0, 0), (1, hidden, 0), (1, stm_pos as u16, 0)],
        "",
    );

    // the classical table only lists the catalog, but points at the stream
    let xref_pos = data.len();
    data.extend_from_slice(b"xref\n0 1\n0000000000 65535 f \n1 1\n");
    data.extend_from_slice(format!("{:010} {:05} n \n", catalog, 0).as_bytes());
    data.extend_from_slice(
        format!("trailer\n<</Size 4/Root 1 0 R/XRefStm {}>>\n", stm_pos).as_bytes(),
    );
    push_footer(&mut data, xref_pos);

    let file = File::from_data(data).unwrap();
    assert_eq!(
        file.resolve(PlainRef { id: 2, gen: 0 })
            .unwrap()
            .into_string()
            .unwrap()
            .as_bytes(),
        b"only in the xref stream"
    );
}

/// The encryption dictionary used by the encrypted-file tests: V4/R4 with
/// an RC4 ("V2") crypt filter, empty user password. `/U` is the known
/// value for this combination of O, P and ID.
fn rc4_crypt_dict() -> CryptDict {
    let mut crypt_filters = HashMap::new();
    crypt_filters.insert(
        "StdCF".to_string(),
        CryptFilter { method: CryptMethod::V2, length: None },
    );
    CryptDict {
        v: 4,
        r: 4,
        bits: 40,
        o: b"owner pwd hash!!".to_vec(),
        u: unhex("E721D9D63EC4E7BD4DA6C9F0E30C8290"),
        oe: None,
        ue: None,
        p: -4,
        encrypt_metadata: true,
        crypt_filters,
        stream_filter: "StdCF".to_string(),
        string_filter: "StdCF".to_string(),
    }
}

fn encrypted_pdf() -> Vec<u8> {
    // encrypt the payloads with an independently constructed decoder
    // (RC4 is symmetric, so decrypt doubles as encrypt)
    let dict = rc4_crypt_dict();
    let id = unhex("DEADBEEF");
    let encoder = Decoder::from_password(&dict, &id, b"").unwrap();
    let secret = encoder
        .decrypt_string(PlainRef { id: 2, gen: 0 }, b"a secret string".to_vec())
        .unwrap();
    let body = encoder
        .decrypt_stream(
            PlainRef { id: 3, gen: 0 },
            &lazypdf::primitive::Dictionary::new(),
            b"stream payload".to_vec(),
        )
        .unwrap();

    let mut data = b"%PDF-1.7\n".to_vec();
    let mut entries = Vec::new();
    entries.push((1, push_obj(&mut data, 1, "<</Type/Catalog>>")));
    entries.push((2, push_obj(&mut data, 2, &format!("<{}>", hex(&secret)))));
    let stream_pos = data.len();
    data.extend_from_slice(
        format!("3 0 obj\n<</Length {}>>\nstream\n", body.len()).as_bytes(),
    );
    data.extend_from_slice(&body);
    data.extend_from_slice(b"\nendstream\nendobj\n");
    entries.push((3, stream_pos));
    entries.push((
        4,
        push_obj(
            &mut data,
            4,
            "<</Filter/Standard/V 4/R 4/Length 40\
             /CF<</StdCF<</Type/CryptFilter/CFM/V2>>>>\
             /StmF/StdCF/StrF/StdCF\
             /O(owner pwd hash!!)\
             /U<E721D9D63EC4E7BD4DA6C9F0E30C8290>\
             /P -4>>",
        ),
    ));
    let xref_pos = push_xref_table(
        &mut data,
        &entries,
        "<</Size 5/Root 1 0 R/Encrypt 4 0 R/ID[<DEADBEEF><DEADBEEF>]>>",
    );
    push_footer(&mut data, xref_pos);
    data
}

#[test]
fn encrypted_file_opens_and_decrypts() {
    init_logger();
    let file = File::from_data(encrypted_pdf()).unwrap();

    // every xref entry resolves
    for id in file.xref().iter().collect::<Vec<_>>() {
        file.resolve(PlainRef { id, gen: 0 }).unwrap();
    }

    // strings decrypt with the per-object key
    let s = file
        .resolve(PlainRef { id: 2, gen: 0 })
        .unwrap()
        .into_string()
        .unwrap();
    assert_eq!(s.as_bytes(), b"a secret string");

    // stream bodies decrypt before the filter chain
    let stream = file
        .resolve(PlainRef { id: 3, gen: 0 })
        .unwrap()
        .into_stream()
        .unwrap();
    assert_eq!(file.stream_data(&stream).unwrap(), b"stream payload");

    // strings inside the encryption dictionary are exempt
    let encrypt = file
        .resolve(PlainRef { id: 4, gen: 0 })
        .unwrap()
        .into_dictionary()
        .unwrap();
    assert_eq!(
        encrypt.get("O").unwrap().as_string().unwrap().as_bytes(),
        b"owner pwd hash!!"
    );
}

#[test]
fn wrong_password_is_rejected() {
    assert!(matches!(
        File::from_data_password(encrypted_pdf(), b"wrong password"),
        Err(PdfError::InvalidPassword)
    ));
}

#[test]
fn name_tree_lookup() {
    let mut data = b"%PDF-1.6\n".to_vec();
    let mut entries = Vec::new();
    entries.push((1, push_obj(&mut data, 1, "<</Type/Catalog>>")));
    entries.push((2, push_obj(&mut data, 2, "<</Kids[3 0 R 4 0 R]>>")));
    entries.push((
        3,
        push_obj(&mut data, 3, "<</Limits[(apple)(mango)]/Names[(apple) 1 (mango) 2]>>"),
    ));
    entries.push((
        4,
        push_obj(&mut data, 4, "<</Limits[(peach)(zebra)]/Names[(peach) 3 (zebra) 4]>>"),
    ));
    let xref_pos = push_xref_table(&mut data, &entries, "<</Size 5/Root 1 0 R>>");
    push_footer(&mut data, xref_pos);

    let file = File::from_data(data).unwrap();
    let root = file.resolve(PlainRef { id: 2, gen: 0 }).unwrap();
    let tree = NameTree::<i32>::from_primitive(root, &file).unwrap();

    assert_eq!(tree.lookup(&file, b"mango").unwrap(), 2);
    assert_eq!(tree.lookup(&file, b"zebra").unwrap(), 4);
    // lexically inside the limits of the first kid, but not stored
    assert!(matches!(
        tree.lookup(&file, b"banana"),
        Err(PdfError::NotFound { .. })
    ));
    // before every kid's lower bound
    assert!(matches!(
        tree.lookup(&file, b"aardvark"),
        Err(PdfError::NotFound { .. })
    ));
}
