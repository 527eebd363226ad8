use crate::candidate::Candidate;
use crate::error::Error;
use crate::job::{JobKind, ResultItem};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// Job kind tags, master to worker.
pub(crate) const KIND_SHUTDOWN: u8 = 0;
pub(crate) const KIND_INDEPENDENT: u8 = 1;
pub(crate) const KIND_GROUPED: u8 = 2;

// Result kind tags, worker to master.
pub(crate) const RESULT_NOTHING: u8 = 0;
pub(crate) const RESULT_CANDIDATE: u8 = 1;
pub(crate) const RESULT_FITNESS: u8 = 2;

pub(crate) const MAX_NAME_BYTES: usize = 1024;
pub(crate) const MAX_PAYLOAD_BYTES: usize = 64 << 20;
pub(crate) const MAX_ITEMS_PER_JOB: usize = 1 << 20;

// All integers are big-endian. Length prefixes are checked against hard caps
// before anything is allocated; an oversized frame is a protocol violation.

pub(crate) async fn write_string<W>(writer: &mut W, value: &str) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    writer.write_u32(value.len() as u32).await?;
    writer.write_all(value.as_bytes()).await?;
    Ok(())
}

pub(crate) async fn read_string<R>(reader: &mut R, cap: usize) -> Result<String, Error>
where
    R: AsyncRead + Unpin,
{
    let bytes = read_bytes(reader, cap).await?;
    Ok(String::from_utf8(bytes)?)
}

pub(crate) async fn write_bytes<W>(writer: &mut W, bytes: &[u8]) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    writer.write_u32(bytes.len() as u32).await?;
    writer.write_all(bytes).await?;
    Ok(())
}

pub(crate) async fn read_bytes<R>(reader: &mut R, cap: usize) -> Result<Vec<u8>, Error>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > cap {
        return Err(Error::FrameTooLarge { len, max: cap });
    }
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).await?;
    Ok(bytes)
}

pub(crate) async fn write_candidate<C, W>(writer: &mut W, candidate: &C) -> Result<(), Error>
where
    C: Candidate,
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(candidate)?;
    write_bytes(writer, &payload).await
}

pub(crate) async fn read_candidate<C, R>(reader: &mut R) -> Result<C, Error>
where
    C: Candidate,
    R: AsyncRead + Unpin,
{
    let payload = read_bytes(reader, MAX_PAYLOAD_BYTES).await?;
    Ok(serde_json::from_slice(&payload)?)
}

pub(crate) struct Handshake {
    pub seed: u32,
    pub return_candidates: bool,
    pub bootstrap: Vec<u8>,
}

pub(crate) async fn write_handshake<W>(writer: &mut W, handshake: &Handshake) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    writer.write_u32(handshake.seed).await?;
    writer.write_u8(handshake.return_candidates as u8).await?;
    write_bytes(writer, &handshake.bootstrap).await
}

pub(crate) async fn read_handshake<R>(reader: &mut R) -> Result<Handshake, Error>
where
    R: AsyncRead + Unpin,
{
    let seed = reader.read_u32().await?;
    let return_candidates = reader.read_u8().await? != 0;
    let bootstrap = read_bytes(reader, MAX_PAYLOAD_BYTES).await?;
    Ok(Handshake {
        seed,
        return_candidates,
        bootstrap,
    })
}

pub(crate) async fn write_job_frame<C, W>(
    writer: &mut W,
    kind: JobKind,
    count_victories_only: bool,
    items: &[(C, usize, bool)],
) -> Result<(), Error>
where
    C: Candidate,
    W: AsyncWrite + Unpin,
{
    match kind {
        JobKind::Independent => writer.write_u8(KIND_INDEPENDENT).await?,
        JobKind::Grouped => {
            writer.write_u8(KIND_GROUPED).await?;
            writer.write_u8(count_victories_only as u8).await?;
        }
    }

    writer.write_u32(items.len() as u32).await?;
    for (_, slot, _) in items {
        writer.write_u32(*slot as u32).await?;
    }
    for (candidate, _, update_fitness) in items {
        write_candidate(writer, candidate).await?;
        writer.write_u8(*update_fitness as u8).await?;
    }
    Ok(())
}

#[derive(Debug)]
pub(crate) struct IncomingItem<C> {
    pub candidate: C,
    pub slot: usize,
    pub update_fitness: bool,
}

#[derive(Debug)]
pub(crate) struct IncomingJob<C> {
    pub kind: JobKind,
    pub count_victories_only: bool,
    pub items: Vec<IncomingItem<C>>,
}

#[derive(Debug)]
pub(crate) enum IncomingFrame<C> {
    Shutdown,
    Job(IncomingJob<C>),
}

pub(crate) async fn read_job_frame<C, R>(reader: &mut R) -> Result<IncomingFrame<C>, Error>
where
    C: Candidate,
    R: AsyncRead + Unpin,
{
    let (kind, count_victories_only) = match reader.read_u8().await? {
        KIND_SHUTDOWN => return Ok(IncomingFrame::Shutdown),
        KIND_INDEPENDENT => (JobKind::Independent, false),
        KIND_GROUPED => (JobKind::Grouped, reader.read_u8().await? != 0),
        tag => return Err(Error::UnknownJobKind(tag)),
    };

    let count = reader.read_u32().await? as usize;
    if count > MAX_ITEMS_PER_JOB {
        return Err(Error::TooManyItems {
            count,
            max: MAX_ITEMS_PER_JOB,
        });
    }

    let mut slots = Vec::with_capacity(count);
    for _ in 0..count {
        slots.push(reader.read_u32().await? as usize);
    }

    let mut items = Vec::with_capacity(count);
    for slot in slots {
        let candidate = read_candidate(reader).await?;
        let update_fitness = reader.read_u8().await? != 0;
        items.push(IncomingItem {
            candidate,
            slot,
            update_fitness,
        });
    }

    Ok(IncomingFrame::Job(IncomingJob {
        kind,
        count_victories_only,
        items,
    }))
}

pub(crate) async fn write_result_item<C, W>(
    writer: &mut W,
    result: &ResultItem<C>,
) -> Result<(), Error>
where
    C: Candidate,
    W: AsyncWrite + Unpin,
{
    match result {
        ResultItem::Nothing => writer.write_u8(RESULT_NOTHING).await?,
        ResultItem::Full(candidate) => {
            writer.write_u8(RESULT_CANDIDATE).await?;
            write_candidate(writer, candidate).await?;
        }
        ResultItem::FitnessOnly { evaluated, fitness } => {
            writer.write_u8(RESULT_FITNESS).await?;
            writer.write_u8(*evaluated as u8).await?;
            writer.write_f64(*fitness).await?;
        }
    }
    Ok(())
}

pub(crate) async fn read_result_item<C, R>(reader: &mut R) -> Result<ResultItem<C>, Error>
where
    C: Candidate,
    R: AsyncRead + Unpin,
{
    let tag = reader.read_u8().await?;
    read_result_item_body(reader, tag).await
}

/// Continues a result item whose kind tag has already been consumed; the
/// receive loop reads the first tag separately to block on "a result exists".
pub(crate) async fn read_result_item_body<C, R>(
    reader: &mut R,
    tag: u8,
) -> Result<ResultItem<C>, Error>
where
    C: Candidate,
    R: AsyncRead + Unpin,
{
    match tag {
        RESULT_NOTHING => Ok(ResultItem::Nothing),
        RESULT_CANDIDATE => Ok(ResultItem::Full(read_candidate(reader).await?)),
        RESULT_FITNESS => {
            let evaluated = reader.read_u8().await? != 0;
            let fitness = reader.read_f64().await?;
            Ok(ResultItem::FitnessOnly { evaluated, fitness })
        }
        tag => Err(Error::UnknownResultKind(tag)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScalarCandidate;
    use float_cmp::assert_approx_eq;

    #[tokio::test]
    async fn job_frame_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let items = vec![
            (ScalarCandidate::new(1.5), 0usize, true),
            (ScalarCandidate::new(2.5), 3usize, false),
        ];
        write_job_frame(&mut client, JobKind::Grouped, true, &items)
            .await
            .unwrap();

        let frame = read_job_frame::<ScalarCandidate, _>(&mut server)
            .await
            .unwrap();
        let job = match frame {
            IncomingFrame::Job(job) => job,
            IncomingFrame::Shutdown => panic!("expected a job frame"),
        };

        assert_eq!(job.kind, JobKind::Grouped);
        assert!(job.count_victories_only);
        assert_eq!(job.items.len(), 2);
        assert_approx_eq!(f64, job.items[0].candidate.genome, 1.5);
        assert_eq!(job.items[1].slot, 3);
        assert!(!job.items[1].update_fitness);
    }

    #[tokio::test]
    async fn unknown_job_kind_is_a_protocol_violation() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_u8(&mut client, 7).await.unwrap();

        let err = read_job_frame::<ScalarCandidate, _>(&mut server)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownJobKind(7)));
    }

    #[tokio::test]
    async fn oversized_name_is_rejected_before_allocation() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_u32(&mut client, u32::MAX)
            .await
            .unwrap();

        let err = read_string(&mut server, MAX_NAME_BYTES).await.unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge { .. }));
    }
}
