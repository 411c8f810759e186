use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, IoResultExt, Result};
use crate::fs::fsync_dir;
use crate::hash::{compute_object_hash, Hash, ObjectHasher};
use crate::store::tree::Tree;

/// zstd level for stored objects (fast, reasonable ratio)
const ZSTD_LEVEL: i32 = 3;

/// kind tag, the first byte of every encoded object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectKind {
    Blob = 0x01,
    Tree = 0x02,
}

impl ObjectKind {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(ObjectKind::Blob),
            0x02 => Some(ObjectKind::Tree),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Tree => "tree",
        }
    }
}

/// a decoded object
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Object {
    Blob(Vec<u8>),
    Tree(Tree),
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Blob(_) => ObjectKind::Blob,
            Object::Tree(_) => ObjectKind::Tree,
        }
    }

    /// encoded form: kind tag followed by payload
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Object::Blob(bytes) => {
                let mut out = Vec::with_capacity(bytes.len() + 1);
                out.push(ObjectKind::Blob.tag());
                out.extend_from_slice(bytes);
                Ok(out)
            }
            Object::Tree(tree) => {
                let mut out = vec![ObjectKind::Tree.tag()];
                ciborium::into_writer(tree, &mut out)?;
                Ok(out)
            }
        }
    }

    /// decode an encoded object, verifying it against `hash`
    pub fn decode(hash: &Hash, encoded: &[u8]) -> Result<Self> {
        if compute_object_hash(encoded) != *hash {
            return Err(Error::CorruptObject(*hash));
        }

        let (tag, payload) = encoded
            .split_first()
            .ok_or_else(|| Error::CorruptObjectMessage(format!("{}: empty object", hash)))?;

        match ObjectKind::from_tag(*tag) {
            Some(ObjectKind::Blob) => Ok(Object::Blob(payload.to_vec())),
            Some(ObjectKind::Tree) => {
                let tree: Tree = ciborium::from_reader(payload)?;
                Ok(Object::Tree(tree))
            }
            None => Err(Error::CorruptObjectMessage(format!(
                "{}: unknown kind tag {:#04x}",
                hash, tag
            ))),
        }
    }
}

/// get the filesystem path to an object
pub fn object_path(objects_dir: &Path, hash: &Hash) -> PathBuf {
    let (dir, file) = hash.to_path_components();
    objects_dir.join(dir).join(file)
}

/// check if an object exists
pub fn object_exists(objects_dir: &Path, hash: &Hash) -> bool {
    object_path(objects_dir, hash).exists()
}

/// write an encoded object, returning its hash
///
/// the object is stored zstd compressed; the hash is computed over the
/// uncompressed encoded bytes so it is independent of the compression.
pub fn write_encoded(objects_dir: &Path, tmp_dir: &Path, encoded: &[u8]) -> Result<Hash> {
    let hash = compute_object_hash(encoded);
    let path = object_path(objects_dir, &hash);

    // dedup: if object already exists, we're done
    if path.exists() {
        return Ok(hash);
    }

    let compressed = zstd::encode_all(encoded, ZSTD_LEVEL).with_path("<zstd>")?;
    install(tmp_dir, &path, |file, tmp_path| {
        file.write_all(&compressed).with_path(tmp_path)
    })?;

    Ok(hash)
}

/// write a blob from a reader without buffering it whole
///
/// returns the blob hash and payload size.
pub fn write_blob_streaming<R: Read>(
    objects_dir: &Path,
    tmp_dir: &Path,
    reader: &mut R,
) -> Result<(Hash, u64)> {
    fs::create_dir_all(tmp_dir).with_path(tmp_dir)?;
    let tmp_path = tmp_dir.join(uuid::Uuid::new_v4().to_string());

    let mut hasher = ObjectHasher::new(ObjectKind::Blob.tag());
    let mut size = 0u64;
    let written = (|| -> Result<()> {
        let file = File::create(&tmp_path).with_path(&tmp_path)?;
        let mut encoder = zstd::Encoder::new(file, ZSTD_LEVEL).with_path(&tmp_path)?;
        encoder
            .write_all(&[ObjectKind::Blob.tag()])
            .with_path(&tmp_path)?;

        let mut buf = [0u8; 64 * 1024]; // 64KB buffer
        loop {
            let n = reader.read(&mut buf).with_path(&tmp_path)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            encoder.write_all(&buf[..n]).with_path(&tmp_path)?;
            size += n as u64;
        }

        let file = encoder.finish().with_path(&tmp_path)?;
        file.sync_all().with_path(&tmp_path)?;
        Ok(())
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    let hash = hasher.finalize();
    let path = object_path(objects_dir, &hash);

    // dedup check
    if path.exists() {
        fs::remove_file(&tmp_path).with_path(&tmp_path)?;
        return Ok((hash, size));
    }

    rename_into_place(&tmp_path, &path)?;
    Ok((hash, size))
}

/// read an encoded object, verifying its hash
pub fn read_encoded(objects_dir: &Path, hash: &Hash) -> Result<Vec<u8>> {
    let path = object_path(objects_dir, hash);
    let compressed = fs::read(&path).map_err(|e| not_found_or_io(e, hash, &path))?;

    let encoded = zstd::decode_all(&compressed[..])
        .map_err(|e| Error::CorruptObjectMessage(format!("{}: {}", hash, e)))?;

    if compute_object_hash(&encoded) != *hash {
        return Err(Error::CorruptObject(*hash));
    }

    Ok(encoded)
}

/// read and decode an object
pub fn read_object(objects_dir: &Path, hash: &Hash) -> Result<Object> {
    let encoded = read_encoded(objects_dir, hash)?;
    Object::decode(hash, &encoded)
}

/// kind of a stored object, reading only its first byte
pub fn read_kind(objects_dir: &Path, hash: &Hash) -> Result<ObjectKind> {
    let path = object_path(objects_dir, hash);
    let file = File::open(&path).map_err(|e| not_found_or_io(e, hash, &path))?;
    let mut decoder = zstd::Decoder::new(file).with_path(&path)?;

    let mut tag = [0u8; 1];
    decoder
        .read_exact(&mut tag)
        .map_err(|e| Error::CorruptObjectMessage(format!("{}: {}", hash, e)))?;

    ObjectKind::from_tag(tag[0]).ok_or_else(|| {
        Error::CorruptObjectMessage(format!("{}: unknown kind tag {:#04x}", hash, tag[0]))
    })
}

/// stream a blob's payload into `writer`, verifying the hash at the end
///
/// returns the number of payload bytes written.
pub fn read_blob_to<W: Write>(objects_dir: &Path, hash: &Hash, writer: &mut W) -> Result<u64> {
    let path = object_path(objects_dir, hash);
    let file = File::open(&path).map_err(|e| not_found_or_io(e, hash, &path))?;
    let mut decoder = zstd::Decoder::new(file).with_path(&path)?;

    let mut tag = [0u8; 1];
    decoder
        .read_exact(&mut tag)
        .map_err(|e| Error::CorruptObjectMessage(format!("{}: {}", hash, e)))?;
    if tag[0] != ObjectKind::Blob.tag() {
        return Err(Error::UnexpectedObjectKind {
            hash: *hash,
            expected: ObjectKind::Blob.name(),
        });
    }

    let mut hasher = ObjectHasher::new(tag[0]);
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = decoder
            .read(&mut buf)
            .map_err(|e| Error::CorruptObjectMessage(format!("{}: {}", hash, e)))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n]).with_path(&path)?;
        total += n as u64;
    }

    if hasher.finalize() != *hash {
        return Err(Error::CorruptObject(*hash));
    }

    Ok(total)
}

/// write to a temp file via `fill`, then move it to `path` atomically
fn install<F>(tmp_dir: &Path, path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut File, &Path) -> Result<()>,
{
    fs::create_dir_all(tmp_dir).with_path(tmp_dir)?;
    let tmp_path = tmp_dir.join(uuid::Uuid::new_v4().to_string());

    let written = (|| -> Result<()> {
        let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
        fill(&mut tmp_file, &tmp_path)?;
        tmp_file.sync_all().with_path(&tmp_path)?;
        Ok(())
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    rename_into_place(&tmp_path, path)
}

fn rename_into_place(tmp_path: &Path, path: &Path) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir).with_path(dir)?;
    fs::rename(tmp_path, path).with_path(path)?;
    fsync_dir(dir)
}

fn not_found_or_io(e: io::Error, hash: &Hash, path: &Path) -> Error {
    if e.kind() == io::ErrorKind::NotFound {
        Error::ObjectNotFound(*hash)
    } else {
        Error::Io {
            path: path.to_path_buf(),
            source: e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tree::{EntryKind, TreeEntry};
    use tempfile::tempdir;

    fn dirs() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempdir().unwrap();
        let objects = dir.path().join("objects");
        let tmp = dir.path().join("tmp");
        (dir, objects, tmp)
    }

    #[test]
    fn test_write_and_read_blob() {
        let (_dir, objects, tmp) = dirs();

        let encoded = Object::Blob(b"hello world".to_vec()).encode().unwrap();
        let hash = write_encoded(&objects, &tmp, &encoded).unwrap();

        assert!(object_exists(&objects, &hash));
        let obj = read_object(&objects, &hash).unwrap();
        assert_eq!(obj, Object::Blob(b"hello world".to_vec()));
    }

    #[test]
    fn test_write_is_idempotent() {
        let (_dir, objects, tmp) = dirs();

        let encoded = Object::Blob(b"same".to_vec()).encode().unwrap();
        let h1 = write_encoded(&objects, &tmp, &encoded).unwrap();
        let h2 = write_encoded(&objects, &tmp, &encoded).unwrap();

        assert_eq!(h1, h2);
    }

    #[test]
    fn test_stored_compressed() {
        let (_dir, objects, tmp) = dirs();

        let content = vec![b'a'; 100_000];
        let encoded = Object::Blob(content).encode().unwrap();
        let hash = write_encoded(&objects, &tmp, &encoded).unwrap();

        let on_disk = fs::metadata(object_path(&objects, &hash)).unwrap().len();
        assert!(on_disk < 10_000);
    }

    #[test]
    fn test_streaming_matches_direct() {
        let (_dir, objects, tmp) = dirs();

        let content = vec![7u8; 200_000];
        let direct = compute_object_hash(&Object::Blob(content.clone()).encode().unwrap());

        let (hash, size) =
            write_blob_streaming(&objects, &tmp, &mut std::io::Cursor::new(&content)).unwrap();

        assert_eq!(hash, direct);
        assert_eq!(size, 200_000);

        let mut out = Vec::new();
        let n = read_blob_to(&objects, &hash, &mut out).unwrap();
        assert_eq!(n, 200_000);
        assert_eq!(out, content);
    }

    #[test]
    fn test_tree_roundtrip() {
        let (_dir, objects, tmp) = dirs();

        let blob = write_encoded(&objects, &tmp, &Object::Blob(b"x".to_vec()).encode().unwrap())
            .unwrap();
        let tree = Tree::new(vec![TreeEntry::new("x.csv", EntryKind::File, blob, 1)]).unwrap();

        let hash = write_encoded(&objects, &tmp, &Object::Tree(tree.clone()).encode().unwrap())
            .unwrap();

        assert_eq!(read_object(&objects, &hash).unwrap(), Object::Tree(tree));
    }

    #[test]
    fn test_blob_and_tree_never_collide() {
        let tree = Tree::empty();
        let tree_enc = Object::Tree(tree).encode().unwrap();
        let blob_enc = Object::Blob(tree_enc[1..].to_vec()).encode().unwrap();

        assert_ne!(compute_object_hash(&tree_enc), compute_object_hash(&blob_enc));
    }

    #[test]
    fn test_read_missing() {
        let (_dir, objects, _tmp) = dirs();
        let result = read_encoded(&objects, &Hash::ZERO);
        assert!(matches!(result, Err(Error::ObjectNotFound(_))));
    }

    #[test]
    fn test_detects_corruption() {
        let (_dir, objects, tmp) = dirs();

        let hash = write_encoded(&objects, &tmp, &Object::Blob(b"good".to_vec()).encode().unwrap())
            .unwrap();
        let evil = zstd::encode_all(&b"\x01evil"[..], 3).unwrap();
        fs::write(object_path(&objects, &hash), evil).unwrap();

        assert!(matches!(
            read_encoded(&objects, &hash),
            Err(Error::CorruptObject(_))
        ));
        assert!(matches!(
            read_blob_to(&objects, &hash, &mut Vec::new()),
            Err(Error::CorruptObject(_))
        ));
    }

    #[test]
    fn test_read_blob_to_rejects_tree() {
        let (_dir, objects, tmp) = dirs();

        let hash = write_encoded(&objects, &tmp, &Object::Tree(Tree::empty()).encode().unwrap())
            .unwrap();

        assert!(matches!(
            read_blob_to(&objects, &hash, &mut Vec::new()),
            Err(Error::UnexpectedObjectKind { .. })
        ));
        assert_eq!(read_kind(&objects, &hash).unwrap(), ObjectKind::Tree);
    }
}
