//! FASTA/FASTQ sequence input
//!
//! Reads DNA sequences from FASTA or FASTQ files, with transparent
//! gzip decompression. Alphabet validation happens during window
//! extraction, where the offending base is actually consumed.

use std::path::Path;

use anyhow::Context;
use needletail::parse_fastx_file;

use crate::error::{EngineError, Result};

/// Parse a FASTA/FASTQ file and call a function for each sequence record
///
/// # Arguments
/// * `path` - Path to input file (may be gzipped)
/// * `callback` - Function called for each record, receives (name, sequence)
///
/// # Errors
/// Returns an error if the file cannot be opened or a record cannot be
/// parsed, or whatever error the callback itself reports.
pub fn parse_sequences<P, F>(path: P, mut callback: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnMut(&[u8], &[u8]) -> Result<()>,
{
    let path = path.as_ref();

    // needletail automatically handles gzip decompression
    let mut reader = parse_fastx_file(path).map_err(|e| EngineError::Sequence {
        path: path.to_path_buf(),
        source: anyhow::Error::new(e).context("failed to open sequence file"),
    })?;

    while let Some(record) = reader.next() {
        let record = record.map_err(|e| EngineError::Sequence {
            path: path.to_path_buf(),
            source: anyhow::Error::new(e).context("failed to parse sequence record"),
        })?;
        let seq = record.seq();
        callback(record.id(), &seq)?;
    }

    Ok(())
}

/// Stream a file's sequences in batches of roughly `batch_bases` bases
///
/// Record boundaries are preserved; a batch closes once it holds at
/// least `batch_bases` bases, so a single long sequence forms its own
/// batch.
///
/// # Errors
/// Same failure modes as [`parse_sequences`].
pub fn parse_batches<P, F>(path: P, batch_bases: usize, mut callback: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnMut(Vec<Vec<u8>>) -> Result<()>,
{
    let mut batch: Vec<Vec<u8>> = Vec::new();
    let mut pending = 0usize;

    parse_sequences(path, |_name, seq| {
        pending += seq.len();
        batch.push(seq.to_vec());
        if pending >= batch_bases {
            pending = 0;
            callback(std::mem::take(&mut batch))?;
        }
        Ok(())
    })?;

    if !batch.is_empty() {
        callback(batch)?;
    }
    Ok(())
}

/// Guess how many bases a sequence file holds without reading it
///
/// The guess comes from the file size: FASTA is mostly sequence, FASTQ
/// spends half its bytes on quality lines, gzip packs DNA at roughly
/// three bases per byte. Good enough to seed the counting planner.
pub fn guess_base_count<P: AsRef<Path>>(path: P) -> Result<u64> {
    let path = path.as_ref();
    let bytes = std::fs::metadata(path)
        .with_context(|| "failed to stat sequence file")
        .map_err(|source| EngineError::Sequence {
            path: path.to_path_buf(),
            source,
        })?
        .len();

    let name = path.to_string_lossy().to_lowercase();
    let guess = if name.ends_with(".gz") {
        bytes.saturating_mul(3)
    } else if name.ends_with(".fq") || name.ends_with(".fastq") {
        bytes / 2
    } else {
        bytes
    };
    Ok(guess.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_fasta_file() -> Result<()> {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, ">seq1").unwrap();
        writeln!(temp_file, "ACGT").unwrap();
        writeln!(temp_file, ">seq2").unwrap();
        writeln!(temp_file, "TGCA").unwrap();
        temp_file.flush().unwrap();

        let mut sequences = Vec::new();
        parse_sequences(temp_file.path(), |name, seq| {
            sequences.push((name.to_vec(), seq.to_vec()));
            Ok(())
        })?;

        assert_eq!(sequences.len(), 2);
        assert_eq!(sequences[0].0, b"seq1");
        assert_eq!(sequences[0].1, b"ACGT");
        assert_eq!(sequences[1].0, b"seq2");
        assert_eq!(sequences[1].1, b"TGCA");

        Ok(())
    }

    #[test]
    fn test_parse_fastq_file() -> Result<()> {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "@read1\nACGTACGT\n+\nIIIIIIII\n").unwrap();
        temp_file.flush().unwrap();

        let mut sequences = Vec::new();
        parse_sequences(temp_file.path(), |_name, seq| {
            sequences.push(seq.to_vec());
            Ok(())
        })?;

        assert_eq!(sequences, vec![b"ACGTACGT".to_vec()]);
        Ok(())
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = parse_sequences("/no/such/file.fa", |_, _| Ok(())).unwrap_err();
        match err {
            EngineError::Sequence { path, .. } => {
                assert_eq!(path, std::path::PathBuf::from("/no/such/file.fa"));
            }
            other => panic!("expected sequence error, got {other}"),
        }
    }

    #[test]
    fn test_batches_preserve_record_order() -> Result<()> {
        let mut temp_file = NamedTempFile::new().unwrap();
        for (i, seq) in ["ACGTACGT", "TTTT", "GGGGGGGGGG", "CC"].iter().enumerate() {
            writeln!(temp_file, ">s{i}").unwrap();
            writeln!(temp_file, "{seq}").unwrap();
        }
        temp_file.flush().unwrap();

        let mut batches = Vec::new();
        parse_batches(temp_file.path(), 10, |batch| {
            batches.push(batch);
            Ok(())
        })?;

        assert!(batches.len() >= 2);
        let flat: Vec<Vec<u8>> = batches.into_iter().flatten().collect();
        assert_eq!(
            flat,
            vec![
                b"ACGTACGT".to_vec(),
                b"TTTT".to_vec(),
                b"GGGGGGGGGG".to_vec(),
                b"CC".to_vec(),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_guess_base_count() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, ">s").unwrap();
        writeln!(temp_file, "ACGTACGTACGT").unwrap();
        temp_file.flush().unwrap();

        let guess = guess_base_count(temp_file.path()).unwrap();
        assert!(guess >= 12);
    }
}
