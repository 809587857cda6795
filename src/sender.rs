use mail_parser::{HeaderName, HeaderValue, MessageParser};
use std::net::IpAddr;
use tracing::warn;

/// The server that handed the message to us, as recorded in `Received:`.
///
/// rspamd cannot recover this from a stored message by itself; without it,
/// mail from domains with a strict DMARC policy is punished as likely spam.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderInfo {
    pub ip: IpAddr,
    pub hostname: String,
}

impl SenderInfo {
    pub fn rspamc_args(&self) -> [String; 2] {
        [
            format!("--ip={}", self.ip),
            format!("--hostname={}", self.hostname),
        ]
    }
}

pub fn sender_info(content: &[u8]) -> Option<SenderInfo> {
    let Some(msg) = MessageParser::default().parse_headers(content) else {
        warn!("could not extract IP/hostname: unparseable headers");
        return None;
    };
    let found = msg.header_values(HeaderName::Received).find_map(|h| {
        if let HeaderValue::Received(r) = h {
            let ip = r.from_ip?;
            let hostname = r
                .from_iprev
                .as_ref()
                .map(|v| v.to_string())
                .or_else(|| r.from.as_ref().map(|v| v.to_string()))?;
            return Some(SenderInfo { ip, hostname });
        }
        None
    });
    if found.is_none() {
        let raw = msg.raw_message();
        let received = msg
            .headers()
            .iter()
            .filter(|h| h.name == HeaderName::Received)
            .filter_map(|h| raw.get(h.offset_start as usize..h.offset_end as usize))
            .map(|v| {
                String::from_utf8_lossy(v)
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join(" ");
        warn!("could not extract IP/hostname from 'Received' header: {received}");
    }
    found
}

#[test]
fn test_sender_info() {
    let mail = b"Received: from a13-67.smtp-out.example.com (a13-67.smtp-out.example.com [192.0.2.1])\r\n\
                 \tby mail.example.com (Postfix) with ESMTPS id 22DFB60A62\r\n\
                 \tfor <mail@example.com>; Thu, 30 Jul 2020 10:25:22 +0200 (CEST)\r\n\
                 From: someone@example.org\r\n\
                 Subject: test\r\n\
                 \r\n\
                 body\r\n";
    let info = sender_info(mail).unwrap();
    assert_eq!(info.ip, "192.0.2.1".parse::<IpAddr>().unwrap());
    assert_eq!(info.hostname, "a13-67.smtp-out.example.com");
    assert_eq!(
        info.rspamc_args(),
        [
            "--ip=192.0.2.1".to_string(),
            "--hostname=a13-67.smtp-out.example.com".to_string()
        ]
    );
}

#[test]
fn test_sender_info_missing() {
    assert_eq!(sender_info(b"From: me\r\nSubject: test\r\n\r\nTest"), None);
}

#[test]
fn test_sender_info_received_without_ip() {
    let mail = b"Received: by mail.example.com (Postfix, from userid 1000)\r\n\
                 \tid 4A1B2C3D; Thu, 30 Jul 2020 10:25:22 +0200 (CEST)\r\n\
                 Subject: local\r\n\
                 \r\n\
                 body\r\n";
    assert_eq!(sender_info(mail), None);
}
