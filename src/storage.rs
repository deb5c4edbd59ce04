//! 로컬 저장소 추상화
//!
//! 세션은 저장소를 순차적으로만 접근함 (단일 리더/단일 라이터).
//! netascii 변환은 저장소와 와이어 페이로드 사이의 `BlockReader`/`BlockWriter`에서 수행

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use crate::message::TransferMode;
use crate::netascii;

/// 순차 읽기/쓰기 저장소
pub trait Storage: Send {
    /// 현재 위치에서 최대 `buf.len()` 바이트 읽기 (0이면 EOF)
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// 현재 위치에 전부 쓰기
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// 절대 오프셋으로 이동
    fn seek(&mut self, offset: u64) -> io::Result<()>;

    /// 전체 길이
    fn len(&self) -> io::Result<u64>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// 파일 기반 저장소
#[derive(Debug)]
pub struct FileStorage {
    file: File,
}

impl FileStorage {
    /// 읽기 전용으로 열기
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            file: File::open(path)?,
        })
    }

    /// 쓰기용으로 생성 (기존 내용은 비움)
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self { file })
    }
}

impl Storage for FileStorage {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)
    }

    fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset)).map(|_| ())
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// 메모리 저장소
///
/// 복제본끼리 버퍼를 공유하므로 전송 후 내용 확인에 사용 가능
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: Arc<Mutex<Vec<u8>>>,
    pos: usize,
}

impl MemoryStorage {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Arc::new(Mutex::new(data.into())),
            pos: 0,
        }
    }

    /// 현재 내용 복사
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl Storage for MemoryStorage {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.data.lock();
        let start = self.pos.min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos = start + n;
        Ok(n)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut data = self.data.lock();
        let end = self.pos + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.pos = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset too large"))?;
        Ok(())
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.data.lock().len() as u64)
    }
}

/// 와이어 상의 전체 길이
///
/// netascii는 변환 후 길이가 달라지므로 한 번 끝까지 읽고 처음으로 되돌림
pub fn wire_len(storage: &mut dyn Storage, mode: TransferMode) -> io::Result<u64> {
    match mode {
        TransferMode::Octet => storage.len(),
        TransferMode::Netascii => {
            let mut total = 0u64;
            let mut raw = vec![0u8; 8192];
            let mut encoded = Vec::with_capacity(raw.len() * 2);
            loop {
                let n = storage.read(&mut raw)?;
                if n == 0 {
                    break;
                }
                encoded.clear();
                netascii::encode(&raw[..n], &mut encoded);
                total += encoded.len() as u64;
            }
            storage.seek(0)?;
            Ok(total)
        }
    }
}

/// 저장소 → 와이어 블록 변환기 (송신측)
pub struct BlockReader {
    storage: Box<dyn Storage>,
    mode: TransferMode,
    /// netascii 변환 후 아직 블록으로 나가지 않은 바이트
    pending: BytesMut,
    scratch: Vec<u8>,
    eof: bool,
}

impl BlockReader {
    pub fn new(storage: Box<dyn Storage>, mode: TransferMode) -> Self {
        Self {
            storage,
            mode,
            pending: BytesMut::new(),
            scratch: Vec::new(),
            eof: false,
        }
    }

    /// 와이어 상의 전체 길이 (tsize 보고용)
    pub fn wire_len(&mut self) -> io::Result<u64> {
        let total = wire_len(self.storage.as_mut(), self.mode)?;
        self.pending.clear();
        self.eof = false;
        Ok(total)
    }

    /// 다음 블록 읽기
    ///
    /// `block_size`보다 짧은 결과가 마지막 블록 (EOF면 빈 블록)
    pub fn read_block(&mut self, block_size: usize) -> io::Result<Bytes> {
        match self.mode {
            TransferMode::Octet => {
                let mut buf = BytesMut::zeroed(block_size);
                let mut filled = 0;
                while filled < block_size && !self.eof {
                    let n = self.storage.read(&mut buf[filled..])?;
                    if n == 0 {
                        self.eof = true;
                    }
                    filled += n;
                }
                buf.truncate(filled);
                Ok(buf.freeze())
            }
            TransferMode::Netascii => {
                self.scratch.resize(block_size, 0);
                while self.pending.len() < block_size && !self.eof {
                    let n = self.storage.read(&mut self.scratch)?;
                    if n == 0 {
                        self.eof = true;
                        break;
                    }
                    let mut encoded = Vec::with_capacity(n + n / 8);
                    netascii::encode(&self.scratch[..n], &mut encoded);
                    self.pending.extend_from_slice(&encoded);
                }
                let take = block_size.min(self.pending.len());
                Ok(self.pending.split_to(take).freeze())
            }
        }
    }
}

/// 와이어 블록 → 저장소 기록기 (수신측)
pub struct BlockWriter {
    storage: Box<dyn Storage>,
    decoder: Option<netascii::Decoder>,
    scratch: Vec<u8>,
}

impl BlockWriter {
    pub fn new(storage: Box<dyn Storage>, mode: TransferMode) -> Self {
        let decoder = match mode {
            TransferMode::Octet => None,
            TransferMode::Netascii => Some(netascii::Decoder::new()),
        };
        Self {
            storage,
            decoder,
            scratch: Vec::new(),
        }
    }

    pub fn write_block(&mut self, payload: &[u8]) -> io::Result<()> {
        match self.decoder.as_mut() {
            None => self.storage.write_all(payload),
            Some(decoder) => {
                self.scratch.clear();
                decoder.decode(payload, &mut self.scratch);
                self.storage.write_all(&self.scratch)
            }
        }
    }

    /// 남은 변환 상태를 비우고 flush
    pub fn finish(&mut self) -> io::Result<()> {
        if let Some(decoder) = self.decoder.as_mut() {
            self.scratch.clear();
            decoder.finish(&mut self.scratch);
            if !self.scratch.is_empty() {
                self.storage.write_all(&self.scratch)?;
            }
        }
        self.storage.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_octet_blocks_with_terminal_empty_block() {
        let data: Vec<u8> = (0..1024u32).map(|i| i as u8).collect();
        let mut reader = BlockReader::new(Box::new(MemoryStorage::new(data.clone())), TransferMode::Octet);

        assert_eq!(reader.read_block(512).unwrap().as_ref(), &data[..512]);
        assert_eq!(reader.read_block(512).unwrap().as_ref(), &data[512..]);
        assert!(reader.read_block(512).unwrap().is_empty());
    }

    #[test]
    fn test_netascii_reader_writer_round_trip() {
        let text = b"first line\nsecond\r\nthird\n".repeat(40);
        let mut reader =
            BlockReader::new(Box::new(MemoryStorage::new(text.clone())), TransferMode::Netascii);

        let wire_len = reader.wire_len().unwrap();
        let sink = MemoryStorage::default();
        let mut writer = BlockWriter::new(Box::new(sink.clone()), TransferMode::Netascii);

        let mut sent = 0u64;
        loop {
            let block = reader.read_block(64).unwrap();
            sent += block.len() as u64;
            writer.write_block(&block).unwrap();
            if block.len() < 64 {
                break;
            }
        }
        writer.finish().unwrap();

        assert_eq!(sent, wire_len);
        assert_eq!(sink.contents(), text);
    }

    #[test]
    fn test_file_storage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let mut storage = FileStorage::create(&path).unwrap();
        storage.write_all(b"hello").unwrap();
        storage.flush().unwrap();
        assert_eq!(storage.len().unwrap(), 5);

        let mut reader = FileStorage::open(&path).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 5);
        reader.seek(1).unwrap();
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"ello");
    }
}
