//! Utility functions used in the file format and export modules.

use std::io::Read;
use std::path::Path;

use crate::error::Result;

use byteordered::byteorder::ReadBytesExt;

/// Check whether the file name ends with ".gz" or ".mgz", i.e., whether the file needs GZip decoding.
pub fn is_gz_file<P>(path: P) -> bool
where
    P: AsRef<Path>,
{
    path.as_ref()
        .file_name()
        .map(|a| {
            let name = a.to_string_lossy();
            name.ends_with(".gz") || name.ends_with(".mgz")
        })
        .unwrap_or(false)
}


/// Read a text line terminated by two consecutive '\n' chars from the input, as used for the creator line of FreeSurfer surf files.
/// Both newlines are consumed, but not added to the returned String.
pub fn read_double_newline_terminated_string<S>(input: &mut S) -> Result<String>
where
    S: Read,
{
    let mut info_line = String::new();
    let mut last_char = '\0';
    loop {
        let cur_char = input.read_u8()? as char;
        if cur_char == '\n' && last_char == '\n' {
            break;
        }
        if last_char == '\n' {
            info_line.push(last_char);
        }
        if cur_char != '\n' {
            info_line.push(cur_char);
        }
        last_char = cur_char;
    }
    Ok(info_line)
}


/// Join integer labels with '_', FreeSurfer aseg surface naming style.
pub fn join_labels(labels: &[i32]) -> String {
    labels.iter().map(|l| l.to_string()).collect::<Vec<String>>().join("_")
}


#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn gz_files_are_detected_by_name() {
        assert!(is_gz_file("subject1/mri/aseg.mgz"));
        assert!(is_gz_file("lh.white.gz"));
        assert!(!is_gz_file("subject1/mri/aseg.mgh"));
        assert!(!is_gz_file("subject1/surf/lh.white"));
    }

    #[test]
    fn creator_line_is_read_up_to_the_double_newline() {
        let mut input = Cursor::new(b"created by someone\non a day\n\nrest".to_vec());
        let line = read_double_newline_terminated_string(&mut input).unwrap();
        assert_eq!("created by someone\non a day", line);
        let mut rest = String::new();
        input.read_to_string(&mut rest).unwrap();
        assert_eq!("rest", rest);
    }

    #[test]
    fn labels_are_joined_with_underscores() {
        assert_eq!("251_252_253", join_labels(&[251, 252, 253]));
        assert_eq!("17", join_labels(&[17]));
    }
}
