// Paired FASTQ reading.
//
// Wraps bio::io::fastq with gzip auto-detection by magic bytes and a
// batched pair API: the two files are read in lockstep and a length
// mismatch is an input error, not an EOF.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read as IoRead, Seek, SeekFrom};
use std::path::Path;

use bio::io::fastq;
use flate2::read::MultiGzDecoder;

use crate::read::Read;

#[derive(Debug)]
pub enum FastqError {
    Io(io::Error),
    Parse(String),
    /// One file ended before the other.
    PairedEndMismatch { file: String },
}

impl fmt::Display for FastqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FastqError::Io(err) => write!(f, "I/O error: {}", err),
            FastqError::Parse(msg) => write!(f, "FASTQ parse error: {}", msg),
            FastqError::PairedEndMismatch { file } => {
                write!(f, "paired-end file mismatch: {} ran out of reads first", file)
            }
        }
    }
}

impl std::error::Error for FastqError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FastqError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for FastqError {
    fn from(err: io::Error) -> Self {
        FastqError::Io(err)
    }
}

const BUFFER_SIZE: usize = 4 * 1024 * 1024;

fn open_possibly_gzipped(path: &Path) -> io::Result<Box<dyn IoRead + Send>> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 2];
    let n = file.read(&mut magic)?;
    file.seek(SeekFrom::Start(0))?;
    if n == 2 && magic == [0x1f, 0x8b] {
        log::debug!("{}: gzip magic detected", path.display());
        Ok(Box::new(BufReader::with_capacity(
            BUFFER_SIZE,
            MultiGzDecoder::new(file),
        )))
    } else {
        Ok(Box::new(BufReader::with_capacity(BUFFER_SIZE, file)))
    }
}

type Records = fastq::Records<BufReader<Box<dyn IoRead + Send>>>;

/// Reader over two FASTQ files in lockstep.
pub struct PairedFastqReader {
    records: [Records; 2],
    names: [String; 2],
}

impl PairedFastqReader {
    pub fn open(path0: &Path, path1: &Path) -> Result<Self, FastqError> {
        let mut records = Vec::with_capacity(2);
        for path in [path0, path1] {
            let reader = fastq::Reader::new(open_possibly_gzipped(path)?);
            records.push(reader.records());
        }
        let mut it = records.into_iter();
        Ok(PairedFastqReader {
            records: [it.next().unwrap(), it.next().unwrap()],
            names: [
                path0.display().to_string(),
                path1.display().to_string(),
            ],
        })
    }

    fn next_read(&mut self, which: usize) -> Result<Option<Read>, FastqError> {
        match self.records[which].next() {
            None => Ok(None),
            Some(Err(e)) => Err(FastqError::Parse(e.to_string())),
            Some(Ok(record)) => Ok(Some(Read::new(
                record.id().to_string(),
                record.seq().to_vec(),
                record.qual().to_vec(),
            ))),
        }
    }

    /// Read up to `batch_size` pairs; an empty batch is EOF.
    pub fn read_batch(&mut self, batch_size: usize) -> Result<Vec<(Read, Read)>, FastqError> {
        let mut batch = Vec::with_capacity(batch_size);
        for _ in 0..batch_size {
            match (self.next_read(0)?, self.next_read(1)?) {
                (Some(r0), Some(r1)) => batch.push((r0, r1)),
                (None, None) => break,
                (Some(_), None) => {
                    return Err(FastqError::PairedEndMismatch {
                        file: self.names[1].clone(),
                    })
                }
                (None, Some(_)) => {
                    return Err(FastqError::PairedEndMismatch {
                        file: self.names[0].clone(),
                    })
                }
            }
        }
        Ok(batch)
    }
}
