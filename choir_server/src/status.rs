//! Paginated personalized status broadcast.
//!
//! One multi-line listing is rendered once per cycle; each connected
//! client receives every page, with the marker byte at the start of
//! *their own* line flipped to `.` for the page(s) sent to them and
//! restored to a space afterward, rather than re-rendering the page per
//! recipient.

use std::net::UdpSocket;

use choir_net::packet::StatusStr;
use choir_net::{BlockIndex, MAX_CLIENTS, STATUS_LINES_PER_PACKET};

use crate::client_table::{ClientCell, ClientTable};

const BORDER: &str = "---------------------";

pub struct StatusBroadcaster {
    status_index: u32,
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        Self { status_index: 0 }
    }

    pub fn broadcast(&mut self, socket: &UdpSocket, table: &ClientTable, _block_index: BlockIndex) {
        let connected = table.connected_in_order();

        let mut lines: Vec<String> = Vec::with_capacity(connected.len() + 2);
        lines.push(BORDER.to_string());
        let mut line_of_id: [Option<usize>; MAX_CLIENTS] = [None; MAX_CLIENTS];
        for &id in &connected {
            let cell = table.get(id).expect("connected id names a live slot");
            line_of_id[id as usize] = Some(lines.len());
            lines.push(render_line(' ', cell));
        }
        lines.push(BORDER.to_string());

        let (mut pages, page_of_line, offset_of_line) = paginate(&lines);
        let packets_cnt = pages.len() as u32;
        self.status_index = self.status_index.wrapping_add(1);

        for &recipient in &connected {
            let recipient_cell = table.get(recipient).expect("connected id names a live slot");
            let line_idx = line_of_id[recipient as usize].expect("recipient has a rendered line");
            let self_page = page_of_line[line_idx];
            let self_offset = offset_of_line[line_idx];

            for (page_index, page) in pages.iter_mut().enumerate() {
                if page_index == self_page {
                    page[self_offset] = b'.';
                }
                let text = String::from_utf8_lossy(page).into_owned();
                let packet = StatusStr {
                    packets_cnt,
                    packet_index: page_index as u32,
                    status_index: self.status_index,
                    text,
                };
                if let Err(e) = socket.send_to(&packet.encode(), recipient_cell.addr()) {
                    log::warn!("failed to send status page to client {recipient}: {e}");
                }
                if page_index == self_page {
                    page[self_offset] = b' ';
                }
            }
        }
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

fn render_line(marker: char, cell: &ClientCell) -> String {
    let aio = cell.aio_latency();
    let aio_str = if aio > 0.0 {
        format!("{aio:.1}")
    } else {
        "?".to_string()
    };
    format!(
        "{marker}{:<16} aio {:>5}ms rest {:>6.1}ms avg {:>5.2} pk {:>5.2}",
        cell.name(),
        aio_str,
        cell.rest_latency(),
        cell.buffer.avg_level(),
        cell.buffer.peak_level(),
    )
}

/// Split rendered lines into byte pages of at most
/// `STATUS_LINES_PER_PACKET` lines each, newline-joined. Returns the
/// pages plus, per source line index, which page it landed on and its
/// marker byte's offset within that page.
fn paginate(lines: &[String]) -> (Vec<Vec<u8>>, Vec<usize>, Vec<usize>) {
    let mut pages = Vec::new();
    let mut page_of_line = vec![0usize; lines.len()];
    let mut offset_of_line = vec![0usize; lines.len()];
    let mut cur = Vec::new();
    let mut cur_count = 0usize;

    for (i, line) in lines.iter().enumerate() {
        if cur_count == STATUS_LINES_PER_PACKET {
            pages.push(std::mem::take(&mut cur));
            cur_count = 0;
        }
        page_of_line[i] = pages.len();
        offset_of_line[i] = cur.len();
        cur.extend_from_slice(line.as_bytes());
        cur.push(b'\n');
        cur_count += 1;
    }
    pages.push(cur);
    (pages, page_of_line, offset_of_line)
}
