//! Terminal layer

use parking_lot::Mutex;

use crate::context::Context;
use crate::error::Result;
use crate::layer::{Chain, Layer};

/// Identity of the terminal layer
pub const TERMINAL_IDENTITY: &str = "PC/SC";

/// Bottom of every stack: hands commands to the reader context.
pub struct TerminalLayer {
    context: Mutex<Context>,
}

impl TerminalLayer {
    pub(crate) fn new(context: Context) -> Self {
        Self {
            context: Mutex::new(context),
        }
    }

    pub(crate) fn close(&self) {
        self.context.lock().close();
    }
}

impl Layer for TerminalLayer {
    fn identity(&self) -> &str {
        TERMINAL_IDENTITY
    }

    fn transmit(&self, _chain: &Chain<'_>, command: &[u8]) -> Result<Vec<u8>> {
        self.context.lock().transmit(command)
    }
}
