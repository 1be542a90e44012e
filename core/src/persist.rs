use crate::cache::{DocSimSums, TermNeighbours};
use crate::{CandidatePool, Corpus, Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_docs: u32,
    pub num_terms: u32,
    pub created_at: String,
    pub version: u32,
}

impl MetaFile {
    pub fn describe(corpus: &Corpus) -> Self {
        let created_at = time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();
        Self {
            num_docs: corpus.docs.len() as u32,
            num_terms: corpus.num_terms() as u32,
            created_at,
            version: FORMAT_VERSION,
        }
    }
}

/// Layout of a persisted corpus directory.
pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    fn corpus(&self) -> PathBuf { self.root.join("corpus.bin") }
    fn meta(&self) -> PathBuf { self.root.join("meta.json") }
}

/// Layout of the similarity cache directory.
#[derive(Debug, Clone)]
pub struct CachePaths {
    pub root: PathBuf,
}

impl CachePaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn doc_sim_sums(&self) -> PathBuf { self.root.join("doc_sim_sums.bin") }
    pub fn term_neighbours(&self) -> PathBuf { self.root.join("col_neighbours.bin") }
}

/// Serializes to a sibling temp file and renames it into place, so readers never
/// observe a half-written artifact.
fn write_bincode<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    }
    let bytes = bincode::serialize(value)?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    // each writer gets its own temp file; the rename publishes it whole
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
    tmp.write_all(&bytes).map_err(|e| Error::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| Error::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
    Ok(())
}

/// `Ok(None)` only when the file does not exist; every other failure is an error.
fn read_bincode<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let mut f = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::io(path, e)),
    };
    let mut buf = Vec::new();
    f.read_to_end(&mut buf).map_err(|e| Error::io(path, e))?;
    let value = bincode::deserialize(&buf).map_err(|source| Error::Decode { path: path.to_path_buf(), source })?;
    Ok(Some(value))
}

fn require<T>(path: &Path, value: Option<T>) -> Result<T> {
    value.ok_or_else(|| Error::io(path, std::io::Error::from(ErrorKind::NotFound)))
}

pub fn save_corpus(paths: &IndexPaths, corpus: &Corpus) -> Result<()> {
    write_bincode(&paths.corpus(), corpus)?;
    save_meta(paths, &MetaFile::describe(corpus))
}

pub fn load_corpus(paths: &IndexPaths) -> Result<Corpus> {
    let path = paths.corpus();
    require(&path, read_bincode(&path)?)
}

pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> Result<()> {
    create_dir_all(&paths.root).map_err(|e| Error::io(&paths.root, e))?;
    let json = serde_json::to_string_pretty(meta)?;
    std::fs::write(paths.meta(), json).map_err(|e| Error::io(paths.meta(), e))?;
    Ok(())
}

pub fn load_meta(paths: &IndexPaths) -> Result<MetaFile> {
    let path = paths.meta();
    let text = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
    Ok(serde_json::from_str(&text)?)
}

pub fn save_candidates(path: &Path, pool: &CandidatePool) -> Result<()> {
    write_bincode(path, pool)
}

pub fn load_candidates(path: &Path) -> Result<CandidatePool> {
    require(path, read_bincode(path)?)
}

pub fn save_doc_sim_sums(paths: &CachePaths, sums: &DocSimSums) -> Result<()> {
    write_bincode(&paths.doc_sim_sums(), sums)
}

/// `Ok(None)` when the cache has not been built yet.
pub fn load_doc_sim_sums(paths: &CachePaths) -> Result<Option<DocSimSums>> {
    read_bincode(&paths.doc_sim_sums())
}

pub fn save_term_neighbours(paths: &CachePaths, neighbours: &TermNeighbours) -> Result<()> {
    write_bincode(&paths.term_neighbours(), neighbours)
}

/// `Ok(None)` when the cache has not been built yet.
pub fn load_term_neighbours(paths: &CachePaths) -> Result<Option<TermNeighbours>> {
    read_bincode(&paths.term_neighbours())
}
