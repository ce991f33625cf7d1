// SPDX-License-Identifier: MIT OR Apache-2.0
//! Response-body compression negotiation for asset streaming.

use std::io::Write;

/// Negotiated content encoding, best first: `br` > `gzip` > identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Brotli.
    Brotli,
    /// Gzip.
    Gzip,
    /// No compression.
    Identity,
}

impl Encoding {
    /// Value for the `Content-Encoding` header, when one applies.
    pub fn header_value(&self) -> Option<&'static str> {
        match self {
            Self::Brotli => Some("br"),
            Self::Gzip => Some("gzip"),
            Self::Identity => None,
        }
    }
}

/// Pick an encoding from an `Accept-Encoding` header.
pub fn negotiate(accept_encoding: &str) -> Encoding {
    if accept_encoding.contains("br") {
        Encoding::Brotli
    } else if accept_encoding.contains("gzip") {
        Encoding::Gzip
    } else {
        Encoding::Identity
    }
}

/// Compress a body with the negotiated encoding.
pub fn compress(data: &[u8], encoding: Encoding) -> std::io::Result<Vec<u8>> {
    match encoding {
        Encoding::Identity => Ok(data.to_vec()),
        Encoding::Gzip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data)?;
            encoder.finish()
        }
        Encoding::Brotli => {
            let mut out = Vec::new();
            {
                let mut writer = brotli::CompressorWriter::new(&mut out, 4096, 5, 22);
                writer.write_all(data)?;
            }
            Ok(out)
        }
    }
}
