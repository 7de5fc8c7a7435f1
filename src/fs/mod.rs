mod file;
mod pipe;

pub use file::{FcbId, Fid, File};
pub use pipe::{PipeId, PipeReader, PipeWriter};

pub(crate) use file::{close_fid, fcb_decref, fcb_install, fcb_reserve, get_file, FileTable};
pub(crate) use pipe::{
    make_pipe, pipe_close_read, pipe_close_write, pipe_read, pipe_write, Pipe, PipeTable,
};
