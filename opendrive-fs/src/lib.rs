pub mod config;
pub mod dircache;
pub mod encoding;
pub mod error;
pub mod fs;
pub mod list;
pub mod object;
pub mod obscure;
pub mod pacer;
pub mod upload;

pub use config::{ConfigError, RemoteConfig};
pub use dircache::{DirCache, DirCacher};
pub use error::{FsError, Result};
pub use fs::OpenDriveFs;
pub use list::{DirEntry, Directory, Lister};
pub use object::{HashType, Object, ObjectInfo, ObjectReader};
pub use obscure::{obscure, reveal};
pub use pacer::{Pacer, PacerConfig};
pub use upload::UploadedFile;
