use crate::error::Error;
use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};
use tokio::net::TcpStream;

pub(crate) type TransportReader = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type TransportWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Splits a connected socket into buffered halves, optionally wrapped in
/// transparent zlib compression. When compression is requested but the
/// `compression` feature was not compiled in, the connection fails closed
/// rather than silently falling back to an uncompressed stream.
pub(crate) fn wrap(
    stream: TcpStream,
    compress: bool,
) -> Result<(TransportReader, TransportWriter), Error> {
    let (read_half, write_half) = stream.into_split();

    if compress {
        #[cfg(feature = "compression")]
        {
            use async_compression::tokio::bufread::ZlibDecoder;
            use async_compression::tokio::write::ZlibEncoder;

            let reader = Box::new(ZlibDecoder::new(BufReader::new(read_half)));
            let writer = Box::new(ZlibEncoder::new(BufWriter::new(write_half)));
            return Ok((reader, writer));
        }

        #[cfg(not(feature = "compression"))]
        return Err(Error::CompressionUnavailable);
    }

    Ok((
        Box::new(BufReader::new(read_half)),
        Box::new(BufWriter::new(write_half)),
    ))
}
