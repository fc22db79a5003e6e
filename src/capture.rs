use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use flate2::read::GzDecoder;
use pcap_file::pcap::PcapReader;
use pcap_file::pcapng::blocks::interface_description::{
    InterfaceDescriptionBlock, InterfaceDescriptionOption,
};
use pcap_file::pcapng::{Block, PcapNgReader};
use pcap_file::{DataLink, PcapError};
use radiotap::Radiotap;
use tracing::{trace, warn};

use crate::dot11::{self, Dot11Header};
use crate::error::AnalysisError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const PCAPNG_MAGIC: [u8; 4] = [0x0a, 0x0d, 0x0d, 0x0a];

const PRISM_HEADER_LEN: usize = 144;
const ETHERTYPE_EAPOL: u16 = 0x888e;
const ETHERTYPE_VLAN: [u16; 2] = [0x8100, 0x88a8];

/// One frame as handed to the classifier.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameRecord {
    /// Capture time in epoch seconds.
    pub timestamp: Option<f64>,
    pub header: Option<Dot11Header>,
    pub eapol: bool,
}

impl FrameRecord {
    /// A frame we could not look inside. It still occupies the timeline.
    pub fn opaque(timestamp: Option<f64>) -> Self {
        FrameRecord {
            timestamp,
            header: None,
            eapol: false,
        }
    }

    pub fn from_dot11(timestamp: Option<f64>, frame: &[u8]) -> Self {
        let header = dot11::parse_header(frame);
        let eapol = header
            .as_ref()
            .map_or(false, |header| dot11::carries_eapol(frame, header));
        FrameRecord {
            timestamp,
            header,
            eapol,
        }
    }

    fn from_ethernet(timestamp: Option<f64>, frame: &[u8]) -> Self {
        let mut offset = 12;
        let mut ethertype = frame.get(offset..offset + 2).map(BigEndian::read_u16);
        while let Some(tag) = ethertype.filter(|t| ETHERTYPE_VLAN.contains(t)) {
            trace!("skipping 802.1Q tag {tag:#06x}");
            offset += 4;
            ethertype = frame.get(offset..offset + 2).map(BigEndian::read_u16);
        }
        FrameRecord {
            timestamp,
            header: None,
            eapol: ethertype == Some(ETHERTYPE_EAPOL),
        }
    }
}

/// Strip whatever the capture put in front of the 802.11 header.
fn decode_link(datalink: &DataLink, timestamp: Option<f64>, data: &[u8]) -> FrameRecord {
    match datalink {
        DataLink::IEEE802_11_RADIOTAP => match Radiotap::from_bytes(data) {
            Ok(radiotap) => {
                let fcs = radiotap.flags.map_or(false, |flags| flags.fcs);
                let payload = data.get(radiotap.header.length..).unwrap_or_default();
                let payload = match fcs {
                    true if payload.len() >= 4 => &payload[..payload.len() - 4],
                    _ => payload,
                };
                FrameRecord::from_dot11(timestamp, payload)
            }
            Err(error) => {
                trace!("Couldn't read packet data with Radiotap: {error:?}");
                FrameRecord::opaque(timestamp)
            }
        },
        DataLink::IEEE802_11 => FrameRecord::from_dot11(timestamp, data),
        DataLink::IEEE802_11_PRISM => match data.get(PRISM_HEADER_LEN..) {
            Some(payload) => FrameRecord::from_dot11(timestamp, payload),
            None => FrameRecord::opaque(timestamp),
        },
        DataLink::IEEE802_11_AVS => {
            let len = data.get(4..8).map(|b| BigEndian::read_u32(b) as usize);
            match len.and_then(|len| data.get(len..)) {
                Some(payload) => FrameRecord::from_dot11(timestamp, payload),
                None => FrameRecord::opaque(timestamp),
            }
        }
        DataLink::PPI => {
            let len = data.get(2..4).map(|b| LittleEndian::read_u16(b) as usize);
            match len.and_then(|len| data.get(len..)) {
                Some(payload) => FrameRecord::from_dot11(timestamp, payload),
                None => FrameRecord::opaque(timestamp),
            }
        }
        DataLink::ETHERNET => FrameRecord::from_ethernet(timestamp, data),
        _ => FrameRecord::opaque(timestamp),
    }
}

/// Epoch seconds for a raw pcapng timestamp count on `interface`.
///
/// pcap-file hands the raw count back as if it were nanoseconds. The real
/// unit comes from `if_tsresol` and defaults to microseconds.
fn interface_seconds(interface: &InterfaceDescriptionBlock, raw: u128) -> Option<f64> {
    let mut units_per_sec = Some(1_000_000u128);
    let mut offset = 0u64;
    for option in &interface.options {
        match option {
            InterfaceDescriptionOption::IfTsResol(resol) if *resol & 0x80 != 0 => {
                units_per_sec = 2u128.checked_pow(u32::from(*resol & 0x7f));
            }
            InterfaceDescriptionOption::IfTsResol(resol) => {
                units_per_sec = 10u128.checked_pow(u32::from(*resol));
            }
            InterfaceDescriptionOption::IfTsOffset(secs) => offset = *secs,
            _ => {}
        }
    }
    let units = units_per_sec?;
    let whole = (raw / units) as f64 + offset as f64;
    Some(whole + (raw % units) as f64 / units as f64)
}

type Stream = Box<dyn BufRead>;

enum Format {
    Pcap {
        reader: PcapReader<Stream>,
        datalink: DataLink,
    },
    PcapNg(PcapNgReader<Stream>),
}

/// Forward-only frame iterator over a pcap or pcapng file, gzipped or not.
///
/// Yields at most one error, after which it is exhausted.
pub struct CaptureReader {
    path: PathBuf,
    format: Format,
    done: bool,
}

fn starts_with<R: BufRead + ?Sized>(reader: &mut R, magic: &[u8]) -> io::Result<bool> {
    Ok(reader.fill_buf()?.starts_with(magic))
}

impl CaptureReader {
    pub fn open(path: &Path) -> Result<Self, AnalysisError> {
        let file = File::open(path).map_err(|err| AnalysisError::unreadable(path, err))?;
        let mut reader = BufReader::new(file);

        let gzipped = starts_with(&mut reader, &GZIP_MAGIC)
            .map_err(|err| AnalysisError::unreadable(path, err))?;
        let mut stream: Stream = if gzipped {
            Box::new(BufReader::new(GzDecoder::new(reader)))
        } else {
            Box::new(reader)
        };

        let pcapng = starts_with(&mut stream, &PCAPNG_MAGIC)
            .map_err(|err| AnalysisError::unreadable(path, err))?;
        let format = if pcapng {
            let reader =
                PcapNgReader::new(stream).map_err(|err| AnalysisError::unreadable(path, err))?;
            Format::PcapNg(reader)
        } else {
            let reader =
                PcapReader::new(stream).map_err(|err| AnalysisError::unreadable(path, err))?;
            let datalink = reader.header().datalink;
            Format::Pcap { reader, datalink }
        };

        Ok(CaptureReader {
            path: path.to_path_buf(),
            format,
            done: false,
        })
    }

    fn next_record(&mut self) -> Option<Result<FrameRecord, PcapError>> {
        match &mut self.format {
            Format::Pcap { reader, datalink } => {
                let packet = reader.next_packet()?;
                Some(packet.map(|packet| {
                    decode_link(datalink, Some(packet.timestamp.as_secs_f64()), &packet.data)
                }))
            }
            Format::PcapNg(reader) => loop {
                // Simple packet blocks carry no timestamp and belong to the
                // first interface of the section.
                let (interface_id, raw, data) = match reader.next_block()? {
                    Ok(Block::EnhancedPacket(packet)) => (
                        packet.interface_id as usize,
                        Some(packet.timestamp.as_nanos()),
                        packet.data.into_owned(),
                    ),
                    Ok(Block::SimplePacket(packet)) => (0, None, packet.data.into_owned()),
                    Ok(_) => continue,
                    Err(err) => return Some(Err(err)),
                };

                // The reader resets its interface table on every section header.
                let record = match reader.interfaces().get(interface_id) {
                    Some(interface) => {
                        let timestamp = raw.and_then(|raw| interface_seconds(interface, raw));
                        decode_link(&interface.linktype, timestamp, &data)
                    }
                    None => FrameRecord::opaque(None),
                };
                return Some(Ok(record));
            },
        }
    }
}

impl Iterator for CaptureReader {
    type Item = Result<FrameRecord, AnalysisError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record()? {
            Ok(record) => Some(Ok(record)),
            Err(PcapError::IncompleteBuffer) => {
                warn!("{}: capture ends mid-record, ignoring the tail", self.path.display());
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(AnalysisError::unreadable(&self.path, err)))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::borrow::Cow;
    use std::io::Write;
    use std::time::Duration;

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
    use pcap_file::pcapng::blocks::enhanced_packet::EnhancedPacketBlock;
    use pcap_file::pcapng::PcapNgWriter;

    use super::*;
    use crate::dot11::tests::{eapol_frame, mgmt_frame, AP, STA};
    use crate::dot11::{FrameType, SUBTYPE_DEAUTHENTICATION, SUBTYPE_DISASSOCIATION};

    /// Minimal radiotap header: version 0, length 8, no fields present.
    pub(crate) fn with_radiotap(frame: &[u8]) -> Vec<u8> {
        let mut packet = vec![0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00];
        packet.extend_from_slice(frame);
        packet
    }

    pub(crate) fn pcap_bytes(datalink: DataLink, packets: &[(f64, Vec<u8>)]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let header = PcapHeader {
                datalink,
                ..Default::default()
            };
            let mut writer = PcapWriter::with_header(&mut out, header).unwrap();
            for (ts, data) in packets {
                let packet =
                    PcapPacket::new(Duration::from_secs_f64(*ts), data.len() as u32, data);
                writer.write_packet(&packet).unwrap();
            }
        }
        out
    }

    pub(crate) fn write_pcap(path: &Path, datalink: DataLink, packets: &[(f64, Vec<u8>)]) {
        std::fs::write(path, pcap_bytes(datalink, packets)).unwrap();
    }

    fn read_all(path: &Path) -> Vec<FrameRecord> {
        CaptureReader::open(path)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn reads_radiotap_pcap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flood.pcap");
        write_pcap(
            &path,
            DataLink::IEEE802_11_RADIOTAP,
            &[
                (100.25, with_radiotap(&mgmt_frame(SUBTYPE_DEAUTHENTICATION, AP, STA))),
                (100.5, with_radiotap(&mgmt_frame(SUBTYPE_DISASSOCIATION, STA, AP))),
                (101.0, with_radiotap(&eapol_frame(true))),
            ],
        );

        let records = read_all(&path);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].timestamp, Some(100.25));
        let deauth = records[0].header.as_ref().unwrap();
        assert!(deauth.is_management(SUBTYPE_DEAUTHENTICATION));
        assert_eq!(deauth.addr2, Some(AP));
        assert!(records[1]
            .header
            .as_ref()
            .unwrap()
            .is_management(SUBTYPE_DISASSOCIATION));
        assert!(records[2].eapol);
        assert_eq!(
            records[2].header.as_ref().unwrap().frame_type,
            FrameType::Data
        );
    }

    #[test]
    fn reads_gzipped_pcap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flood.pcap.gz");
        let raw = pcap_bytes(
            DataLink::IEEE802_11,
            &[(5.5, mgmt_frame(SUBTYPE_DEAUTHENTICATION, AP, STA))],
        );
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(&raw).unwrap();
        encoder.finish().unwrap();

        let records = read_all(&path);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp, Some(5.5));
        assert!(records[0]
            .header
            .as_ref()
            .unwrap()
            .is_management(SUBTYPE_DEAUTHENTICATION));
    }

    /// One interface with `options`, then one disassoc frame per raw tick count.
    fn write_pcapng(
        path: &Path,
        options: Vec<InterfaceDescriptionOption<'static>>,
        ticks: &[u64],
    ) {
        let file = File::create(path).unwrap();
        let mut writer = PcapNgWriter::new(file).unwrap();
        let interface = InterfaceDescriptionBlock {
            linktype: DataLink::IEEE802_11,
            snaplen: 0xffff,
            options,
        };
        writer
            .write_block(&Block::InterfaceDescription(interface))
            .unwrap();
        let frame = mgmt_frame(SUBTYPE_DISASSOCIATION, STA, AP);
        for raw in ticks {
            let packet = EnhancedPacketBlock {
                interface_id: 0,
                timestamp: Duration::from_nanos(*raw),
                original_len: frame.len() as u32,
                data: Cow::Borrowed(&frame),
                options: vec![],
            };
            writer.write_block(&Block::EnhancedPacket(packet)).unwrap();
        }
    }

    #[test]
    fn pcapng_defaults_to_microsecond_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dumpcap.pcapng");
        write_pcapng(&path, vec![], &[1_700_000_000_500_000]);

        let records = read_all(&path);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp, Some(1_700_000_000.5));
        let header = records[0].header.as_ref().unwrap();
        assert!(header.is_management(SUBTYPE_DISASSOCIATION));
        assert_eq!(header.addr2, Some(STA));
    }

    #[test]
    fn pcapng_honours_tsresol_and_tsoffset() {
        let dir = tempfile::tempdir().unwrap();

        let nanos = dir.path().join("nanos.pcapng");
        write_pcapng(
            &nanos,
            vec![InterfaceDescriptionOption::IfTsResol(9)],
            &[1_700_000_000_250_000_000],
        );
        assert_eq!(read_all(&nanos)[0].timestamp, Some(1_700_000_000.25));

        let binary = dir.path().join("binary.pcapng");
        write_pcapng(
            &binary,
            vec![
                InterfaceDescriptionOption::IfTsResol(0x80 | 10),
                InterfaceDescriptionOption::IfTsOffset(1_000),
            ],
            &[2048 + 512],
        );
        assert_eq!(read_all(&binary)[0].timestamp, Some(1_002.5));

        let absurd = dir.path().join("absurd.pcapng");
        write_pcapng(&absurd, vec![InterfaceDescriptionOption::IfTsResol(100)], &[1]);
        assert_eq!(read_all(&absurd)[0].timestamp, None);
    }

    #[test]
    fn ethernet_eapol_is_detected_without_dot11() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&AP.0);
        frame.extend_from_slice(&STA.0);
        frame.extend_from_slice(&[0x81, 0x00, 0x00, 0x0a]);
        frame.extend_from_slice(&[0x88, 0x8e, 0x02, 0x03, 0x00, 0x5f]);

        let record = decode_link(&DataLink::ETHERNET, Some(1.0), &frame);
        assert!(record.eapol);
        assert_eq!(record.header, None);

        frame[16] = 0x08;
        frame[17] = 0x00;
        assert!(!decode_link(&DataLink::ETHERNET, Some(1.0), &frame).eapol);
    }

    #[test]
    fn prism_and_ppi_headers_are_stripped() {
        let frame = mgmt_frame(SUBTYPE_DEAUTHENTICATION, AP, STA);

        let mut prism = vec![0u8; PRISM_HEADER_LEN];
        prism.extend_from_slice(&frame);
        let record = decode_link(&DataLink::IEEE802_11_PRISM, Some(0.0), &prism);
        assert_eq!(record.header.unwrap().addr2, Some(AP));

        let mut ppi = vec![0x00, 0x00, 0x08, 0x00, 0x69, 0x00, 0x00, 0x00];
        ppi.extend_from_slice(&frame);
        let record = decode_link(&DataLink::PPI, Some(0.0), &ppi);
        assert!(record.header.unwrap().is_management(SUBTYPE_DEAUTHENTICATION));
    }

    #[test]
    fn garbage_radiotap_is_opaque() {
        let record = decode_link(&DataLink::IEEE802_11_RADIOTAP, Some(3.0), &[0x00]);
        assert_eq!(record, FrameRecord::opaque(Some(3.0)));
    }

    #[test]
    fn missing_or_bogus_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.pcap");
        assert!(matches!(
            CaptureReader::open(&missing),
            Err(AnalysisError::TraceUnreadable { .. })
        ));

        let bogus = dir.path().join("bogus.pcap");
        std::fs::write(&bogus, b"definitely not a capture file").unwrap();
        assert!(matches!(
            CaptureReader::open(&bogus),
            Err(AnalysisError::TraceUnreadable { .. })
        ));
    }
}
