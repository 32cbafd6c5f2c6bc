use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{MotifError, MotifResult};

pub const MAGIC: &[u8; 8] = b"MOTIFS01";
pub const VERSION_V1: u32 = 1;
pub const VERSION_CURRENT: u32 = VERSION_V1;

const JSON_TAG: [u8; 4] = *b"JSON";
const FILE_EXT: &str = "motif";

pub fn compress_lz4(input: &[u8]) -> Vec<u8> {
    lz4_flex::compress(input)
}

pub fn decompress_lz4(input: &[u8], expected_size: usize) -> io::Result<Vec<u8>> {
    // Raw LZ4 block; the size travels in the chunk header.
    lz4_flex::decompress(input, expected_size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "lz4 decompression failed"))
}

pub fn write_u32_le<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn read_exact<const N: usize, R: Read>(r: &mut R) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_u32_le<R: Read>(r: &mut R) -> io::Result<u32> {
    Ok(u32::from_le_bytes(read_exact::<4, _>(r)?))
}

/// Write an LZ4 chunk.
///
/// Layout:
/// - tag: [u8;4]
/// - len: u32 (bytes following, including the 4-byte uncompressed length)
/// - uncompressed_len: u32
/// - compressed payload bytes
pub fn write_chunk_lz4<W: Write>(w: &mut W, tag: [u8; 4], payload: &[u8]) -> io::Result<()> {
    let compressed = compress_lz4(payload);
    let uncompressed_len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk too large"))?;
    let total_len = 4u32.saturating_add(
        u32::try_from(compressed.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk too large"))?,
    );

    w.write_all(&tag)?;
    write_u32_le(w, total_len)?;
    write_u32_le(w, uncompressed_len)?;
    w.write_all(&compressed)
}

pub fn read_chunk_header<R: Read>(r: &mut R) -> io::Result<([u8; 4], u32)> {
    let tag = read_exact::<4, _>(r)?;
    let len = read_u32_le(r)?;
    Ok((tag, len))
}

// LZ4 block format cannot expand a byte into more than 255.
const LZ4_MAX_RATIO: usize = 255;

/// Read the body of an LZ4 chunk whose header has already been consumed.
/// Lengths are checked against the bytes left in `r` before allocating.
pub fn read_chunk_lz4_body(r: &mut &[u8], len: u32) -> io::Result<Vec<u8>> {
    let len = len as usize;
    if len < 4 || len > r.len() {
        return Err(invalid_data("chunk length exceeds artifact size"));
    }
    let uncompressed_len = read_u32_le(r)? as usize;
    let (compressed, rest) = r.split_at(len - 4);
    if uncompressed_len > compressed.len().saturating_mul(LZ4_MAX_RATIO) + 16 {
        return Err(invalid_data("implausible uncompressed chunk size"));
    }
    *r = rest;
    decompress_lz4(compressed, uncompressed_len)
}

/// Serialize `value` into a self-describing artifact image.
pub fn encode_artifact<T: Serialize>(value: &T) -> MotifResult<Vec<u8>> {
    let json = serde_json::to_vec(value)?;
    let mut out = Vec::with_capacity(json.len() / 2 + 20);
    out.extend_from_slice(MAGIC);
    write_u32_le(&mut out, VERSION_CURRENT)?;
    write_chunk_lz4(&mut out, JSON_TAG, &json)?;
    Ok(out)
}

pub fn decode_artifact<T: DeserializeOwned>(bytes: &[u8]) -> MotifResult<T> {
    let mut r = bytes;
    let magic = read_exact::<8, _>(&mut r)?;
    if &magic != MAGIC {
        return Err(invalid_data("bad artifact magic").into());
    }
    let version = read_u32_le(&mut r)?;
    if version != VERSION_CURRENT {
        return Err(invalid_data(&format!("unsupported artifact version {version}")).into());
    }
    let (tag, len) = read_chunk_header(&mut r)?;
    if tag != JSON_TAG {
        return Err(invalid_data("missing JSON chunk").into());
    }
    let json = read_chunk_lz4_body(&mut r, len)?;
    Ok(serde_json::from_slice(&json)?)
}

fn invalid_data(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

/// Flat key-value store for search artifacts.
pub trait ArtifactStore: Sync {
    fn save_bytes(&self, key: &str, bytes: &[u8]) -> MotifResult<()>;

    /// `Ok(None)` when the key has never been written.
    fn load_bytes(&self, key: &str) -> MotifResult<Option<Vec<u8>>>;

    fn contains(&self, key: &str) -> bool;

    fn save<T: Serialize>(&self, key: &str, value: &T) -> MotifResult<()>
    where
        Self: Sized,
    {
        self.save_bytes(key, &encode_artifact(value)?)
    }

    fn load<T: DeserializeOwned>(&self, key: &str) -> MotifResult<Option<T>>
    where
        Self: Sized,
    {
        match self.load_bytes(key)? {
            Some(bytes) => Ok(Some(decode_artifact(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// One file per key under a root directory.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> MotifResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{FILE_EXT}", sanitize_key(key)))
    }
}

impl ArtifactStore for DirStore {
    fn save_bytes(&self, key: &str, bytes: &[u8]) -> MotifResult<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension(format!("{FILE_EXT}.tmp"));
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(bytes)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load_bytes(&self, key: &str) -> MotifResult<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MotifError::Storage(e)),
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.path_for(key).is_file()
    }
}

/// Keys become file names: keep descriptor characters, replace the rest.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '#') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

impl ArtifactStore for MemoryStore {
    fn save_bytes(&self, key: &str, bytes: &[u8]) -> MotifResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| io::Error::other("memory store poisoned"))?;
        entries.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn load_bytes(&self, key: &str) -> MotifResult<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| io::Error::other("memory store poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|m| m.contains_key(key))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landscape::{landscape, InputRange};
    use crate::motif::{build_motif_population, MotifModel, MotifSpec, Topology};
    use crate::search::{SearchRecord, SearchSnapshot, Termination};

    fn models() -> Vec<MotifModel> {
        let spec = MotifSpec::new(Topology::CoherentLoop, 2, &["tanh", "sigmoid"], &["sum", "max"])
            .unwrap();
        build_motif_population(&spec, 3, None, None, 17).unwrap()
    }

    fn bits(v: &[f64]) -> Vec<u64> {
        v.iter().map(|x| x.to_bits()).collect()
    }

    #[test]
    fn models_round_trip_bit_exact() {
        let pop = models();
        let bytes = encode_artifact(&pop).unwrap();
        assert_eq!(&bytes[..8], MAGIC);
        let back: Vec<MotifModel> = decode_artifact(&bytes).unwrap();
        assert_eq!(back, pop);
        for (a, b) in pop.iter().zip(back.iter()) {
            assert_eq!(bits(&a.parameter_values()), bits(&b.parameter_values()));
        }
    }

    #[test]
    fn grids_and_records_round_trip() {
        let pop = models();
        let l = landscape(&pop[0], InputRange::default(), 13).unwrap();
        let back: crate::landscape::Landscape = decode_artifact(&encode_artifact(&l).unwrap()).unwrap();
        assert_eq!(bits(&back.flat_values()), bits(&l.flat_values()));

        let record = SearchRecord {
            snapshots: vec![SearchSnapshot {
                source: pop[0].clone(),
                target: pop[1].clone(),
                inner_loss_trace: vec![0.1 + 0.2, 1.0 / 3.0, 1e-300],
                outer_loss: std::f64::consts::PI,
            }],
            termination: Termination::ConvergedByThreshold,
        };
        let back: SearchRecord = decode_artifact(&encode_artifact(&record).unwrap()).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn corrupt_images_are_rejected() {
        let mut bytes = encode_artifact(&models()).unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            decode_artifact::<Vec<MotifModel>>(&bytes),
            Err(MotifError::Storage(_))
        ));
        let bytes = encode_artifact(&models()).unwrap();
        assert!(decode_artifact::<Vec<MotifModel>>(&bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn invalid_payloads_fail_to_decode() {
        let mut json = serde_json::to_value(models()).unwrap();
        json[0]["spec"]["subtype"] = 9.into();
        let bytes = encode_artifact(&json).unwrap();
        assert!(matches!(
            decode_artifact::<Vec<MotifModel>>(&bytes),
            Err(MotifError::Serde(_))
        ));
    }

    #[test]
    fn oversized_chunk_length_is_rejected() {
        let mut bytes = encode_artifact(&models()).unwrap();
        // Chunk length field sits after magic, version and tag.
        bytes[16..20].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            decode_artifact::<Vec<MotifModel>>(&bytes),
            Err(MotifError::Storage(_))
        ));

        let mut bytes = encode_artifact(&models()).unwrap();
        bytes[20..24].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            decode_artifact::<Vec<MotifModel>>(&bytes),
            Err(MotifError::Storage(_))
        ));
    }

    #[test]
    fn memory_store_save_load_contains() {
        let store = MemoryStore::new();
        assert!(!store.contains("k"));
        assert!(store.load::<Vec<MotifModel>>("k").unwrap().is_none());
        store.save("k", &models()).unwrap();
        assert!(store.contains("k"));
        assert_eq!(store.load::<Vec<MotifModel>>("k").unwrap(), Some(models()));
        assert_eq!(store.keys(), vec!["k".to_string()]);
    }

    #[test]
    fn dir_store_writes_one_file_per_key() {
        let dir = std::env::temp_dir().join(format!("motifscape-store-{}", std::process::id()));
        let store = DirStore::open(&dir).unwrap();
        let key = "collider-1-relu-sum#0__vs__chain-2-tanh_tanh";
        store.save(key, &models()).unwrap();
        assert!(store.contains(key));
        assert!(store.path_for(key).is_file());
        assert_eq!(store.load::<Vec<MotifModel>>(key).unwrap(), Some(models()));
        assert!(store.load::<Vec<MotifModel>>("missing").unwrap().is_none());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn keys_are_sanitized() {
        assert_eq!(sanitize_key("a/b c#1"), "a_b_c#1");
    }
}
