use crate::sponge::{Sponge, StageError};
use std::io::{self, Read};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("failed to read input: {0}")]
    Read(#[source] io::Error),

    #[error(transparent)]
    Stage(#[from] StageError),
}

/// Pump `input` into `sponge` in `chunk_size` pieces until end of stream.
///
/// Stops at the first read error or the first failed write; either way the
/// caller is expected to abort. Returns the number of bytes transferred.
pub fn transfer<R>(
    input: &mut R,
    sponge: &mut dyn Sponge,
    chunk_size: usize,
) -> Result<u64, TransferError>
where
    R: Read + ?Sized,
{
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;

    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => {
                log::debug!("End of input after {} bytes", total);
                return Ok(total);
            }
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(TransferError::Read(err)),
        };
        log::trace!("Read {} bytes", n);
        sponge.write(&buf[..n])?;
        total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        writes: Vec<usize>,
        data: Vec<u8>,
        fail_after: Option<usize>,
    }

    impl Sponge for Recorder {
        fn begin(&mut self) -> Result<(), StageError> {
            Ok(())
        }

        fn write(&mut self, data: &[u8]) -> Result<(), StageError> {
            if self.fail_after == Some(self.writes.len()) {
                return Err(StageError::ShortWrite {
                    path: "recorder".into(),
                    written: 0,
                    expected: data.len(),
                });
            }
            self.writes.push(data.len());
            self.data.extend_from_slice(data);
            Ok(())
        }

        fn complete(&mut self) -> Result<(), StageError> {
            Ok(())
        }

        fn abort(&mut self) -> Result<(), StageError> {
            Ok(())
        }

        fn cleanup(&mut self) -> Result<(), StageError> {
            Ok(())
        }
    }

    /// Yields `data`, then fails.
    struct Flaky<'a> {
        data: &'a [u8],
        interrupted: bool,
    }

    impl Read for Flaky<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(io::Error::from(io::ErrorKind::Interrupted));
            }
            if self.data.is_empty() {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "upstream died"));
            }
            let n = buf.len().min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_chunks_input() {
        let input = vec![1u8; 10_000];
        let mut sponge = Recorder::default();

        let total = transfer(&mut input.as_slice(), &mut sponge, 4096).unwrap();
        assert_eq!(total, 10_000);
        assert_eq!(sponge.writes, vec![4096, 4096, 1808]);
        assert_eq!(sponge.data, input);
    }

    #[test]
    fn test_empty_input() {
        let mut sponge = Recorder::default();
        let total = transfer(&mut io::empty(), &mut sponge, 16).unwrap();
        assert_eq!(total, 0);
        assert!(sponge.writes.is_empty());
    }

    #[test]
    fn test_read_error_stops_transfer() {
        let mut input = Flaky {
            data: b"some data",
            interrupted: false,
        };
        let mut sponge = Recorder::default();

        let err = transfer(&mut input, &mut sponge, 4).unwrap_err();
        assert!(
            matches!(err, TransferError::Read(ref e) if e.kind() == io::ErrorKind::BrokenPipe)
        );
        assert_eq!(sponge.data, b"some data");
    }

    #[test]
    fn test_write_error_stops_transfer() {
        let input = vec![0u8; 100];
        let mut sponge = Recorder {
            fail_after: Some(2),
            ..Recorder::default()
        };

        let err = transfer(&mut input.as_slice(), &mut sponge, 10).unwrap_err();
        assert!(matches!(err, TransferError::Stage(StageError::ShortWrite { .. })));
        assert_eq!(sponge.writes.len(), 2);
    }
}
