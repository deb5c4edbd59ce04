//! netascii 변환 (RFC 764 / RFC 1350)
//!
//! - 로컬 → 와이어: LF → CR LF, CR → CR NUL
//! - 와이어 → 로컬: CR LF → LF, CR NUL → CR
//!
//! 블록 경계에서 CR이 잘릴 수 있으므로 디코더는 상태를 가짐

/// 로컬 바이트를 netascii로 변환 (상태 없음)
pub fn encode(input: &[u8], out: &mut Vec<u8>) {
    out.reserve(input.len() + input.len() / 16);
    for &byte in input {
        match byte {
            b'\n' => out.extend_from_slice(b"\r\n"),
            b'\r' => out.extend_from_slice(b"\r\0"),
            other => out.push(other),
        }
    }
}

/// 스트리밍 netascii 디코더
#[derive(Debug, Default)]
pub struct Decoder {
    /// 직전 블록이 CR로 끝났는지
    pending_cr: bool,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 와이어 바이트를 로컬 표현으로 변환
    pub fn decode(&mut self, input: &[u8], out: &mut Vec<u8>) {
        out.reserve(input.len());
        for &byte in input {
            if self.pending_cr {
                self.pending_cr = false;
                match byte {
                    b'\n' => out.push(b'\n'),
                    0 => out.push(b'\r'),
                    b'\r' => {
                        out.push(b'\r');
                        self.pending_cr = true;
                    }
                    other => {
                        out.push(b'\r');
                        out.push(other);
                    }
                }
            } else if byte == b'\r' {
                self.pending_cr = true;
            } else {
                out.push(byte);
            }
        }
    }

    /// 스트림 끝: 남은 CR 방출
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        if self.pending_cr {
            self.pending_cr = false;
            out.push(b'\r');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_vec(input: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        encode(input, &mut out);
        out
    }

    #[test]
    fn test_encode_line_endings() {
        assert_eq!(encode_vec(b"a\nb"), b"a\r\nb");
        assert_eq!(encode_vec(b"a\rb"), b"a\r\0b");
        assert_eq!(encode_vec(b""), b"");
    }

    #[test]
    fn test_decode_split_across_blocks() {
        let wire = encode_vec(b"line1\nline2\r\nend\r");

        // 모든 분할 지점에서 동일한 결과
        for split in 0..=wire.len() {
            let mut decoder = Decoder::new();
            let mut out = Vec::new();
            decoder.decode(&wire[..split], &mut out);
            decoder.decode(&wire[split..], &mut out);
            decoder.finish(&mut out);
            assert_eq!(out, b"line1\nline2\r\nend\r", "split at {}", split);
        }
    }

    #[test]
    fn test_decode_lenient_bare_cr() {
        let mut decoder = Decoder::new();
        let mut out = Vec::new();
        decoder.decode(b"a\rb", &mut out);
        decoder.finish(&mut out);
        assert_eq!(out, b"a\rb");
    }
}
