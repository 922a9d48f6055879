//! `.npz` result archives: zip files of `.npy` members whose names are
//! `/`-separated group paths such as `motion_correction/x_shifts_els`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ndarray::{ArrayBase, ArrayD, Data, Dimension};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{ImagingError, Result};
use crate::io::npy::{decode_npy, NpyElement};
use crate::io::npy_writer::encode_npy;

/// Upper bound on the buffer reserved from a member's declared size.
const MAX_MEMBER_PREALLOC: usize = 64 << 20;

/// Read-only view over a result archive.
pub struct ResultArchive {
    path: PathBuf,
    /// Group path (without `.npy`) -> raw member name.
    members: BTreeMap<String, String>,
    zip: Mutex<ZipArchive<File>>,
}

impl ResultArchive {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let zip = ZipArchive::new(file).map_err(|e| archive_error(path, e))?;
        let members = zip
            .file_names()
            .filter(|name| !name.ends_with('/'))
            .map(|name| {
                let group = name.trim_start_matches('/');
                let group = group.strip_suffix(".npy").unwrap_or(group);
                (group.to_string(), name.to_string())
            })
            .collect();
        Ok(Self {
            path: path.to_path_buf(),
            members,
            zip: Mutex::new(zip),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn member_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.members.keys().map(String::as_str)
    }

    /// True for an array member or for a group holding at least one member.
    pub fn contains(&self, name: &str) -> bool {
        if self.members.contains_key(name) {
            return true;
        }
        let prefix = format!("{}/", name.trim_end_matches('/'));
        self.members
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(group, _)| group.starts_with(&prefix))
    }

    /// Names from `required` that the archive does not hold.
    pub fn missing(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|name| !self.contains(name))
            .map(|name| name.to_string())
            .collect()
    }

    pub fn read<T: NpyElement>(&self, name: &str) -> Result<ArrayD<T>> {
        let raw_name = self.members.get(name).ok_or_else(|| {
            ImagingError::missing("archive", &self.path, vec![name.to_string()])
        })?;

        let bytes = {
            let mut zip = self.zip.lock().map_err(|_| {
                ImagingError::InvalidArray(format!("{}: archive lock poisoned", self.path.display()))
            })?;
            let mut member = zip
                .by_name(raw_name)
                .map_err(|e| archive_error(&self.path, e))?;
            let hint = usize::try_from(member.size()).unwrap_or(usize::MAX);
            let mut bytes = Vec::with_capacity(hint.min(MAX_MEMBER_PREALLOC));
            member.read_to_end(&mut bytes)?;
            bytes
        };

        decode_npy(&bytes).map_err(|e| match e {
            ImagingError::InvalidArray(msg) => {
                ImagingError::InvalidArray(format!("{}:{name}: {msg}", self.path.display()))
            }
            other => other,
        })
    }

    pub fn read_optional<T: NpyElement>(&self, name: &str) -> Result<Option<ArrayD<T>>> {
        if self.members.contains_key(name) {
            self.read(name).map(Some)
        } else {
            Ok(None)
        }
    }
}

fn archive_error(path: &Path, err: ZipError) -> ImagingError {
    match err {
        ZipError::Io(io) => ImagingError::Io(io),
        other => ImagingError::InvalidArray(format!("{}: {other}", path.display())),
    }
}

/// Writes `.npz` archives member by member.
pub struct ArchiveWriter {
    zip: ZipWriter<BufWriter<File>>,
    path: PathBuf,
}

impl ArchiveWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = BufWriter::new(File::create(path)?);
        Ok(Self {
            zip: ZipWriter::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Add one array under its group path (`.npy` is appended).
    pub fn add_array<T, S, D>(&mut self, name: &str, array: &ArrayBase<S, D>) -> Result<()>
    where
        T: NpyElement,
        S: Data<Elem = T>,
        D: Dimension,
    {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        self.zip
            .start_file(format!("{name}.npy"), options)
            .map_err(|e| archive_error(&self.path, e))?;
        self.zip.write_all(&encode_npy(array))?;
        Ok(())
    }

    pub fn finish(self) -> Result<()> {
        let mut file = self.zip.finish().map_err(|e| archive_error(&self.path, e))?;
        file.flush()?;
        Ok(())
    }
}
