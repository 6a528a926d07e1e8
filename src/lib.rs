/*

Chapter titles of an MKV are edited in one of two dialects:

;FFMETADATA1                  <Chapters>
[CHAPTER]                       <EditionEntry>
TIMEBASE=1/1000                   <ChapterAtom>
START=0                             <ChapterUID>1573092137066836364</ChapterUID>
END=65000                           <ChapterTimeStart>00:00:00.000000000</ChapterTimeStart>
TITLE=Opening                       <ChapterDisplay><ChapterString>Opening</ChapterString>...

The text dialect is patched in place, the XML dialect is rebuilt from the chapter list.

*/

pub mod chapter;
pub mod chapters;
pub mod config;
pub mod editor;
pub mod error;
pub mod ffmetadata;
pub mod file;
pub mod info;
pub mod mkv;
pub mod process;
pub mod progress;
pub mod session;
pub mod temp;
pub mod utils;

pub use chapter::{Chapter, ChapterFlags};
pub use config::Config;
pub use error::{ChapterError, Result};
pub use info::ContainerInfo;
pub use mkv::Dialect;
pub use progress::{ToolEvent, ToolProgress};
pub use session::{EditSession, RemuxOutcome, SessionState};
