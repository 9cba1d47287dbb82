use std::io::Write;

use livechat::ChatItem;

use crate::error::Result;

/// Writes one JSON document per item.
pub struct ItemWriter<W: Write> {
    out: W,
    pretty: bool,
}

impl<W: Write> ItemWriter<W> {
    pub fn new(out: W, pretty: bool) -> Self {
        Self { out, pretty }
    }

    pub fn write(&mut self, item: &ChatItem) -> Result<()> {
        if self.pretty {
            serde_json::to_writer_pretty(&mut self.out, item)?;
        } else {
            serde_json::to_writer(&mut self.out, item)?;
        }
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}
