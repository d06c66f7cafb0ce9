use std::fs::File;
use std::io;
use std::io::Write;
use std::path::Path;

const CONFIG_SAMPLE: &str = r#"# For the file locations, If you want it to be relative to the executable directory
# use ${exe_dir}/location
[repository]
path = "${exe_dir}/blog"
# Cloned into path when the working tree does not exist
# url = "git@github.com:someone/blog.git"
remote = "origin"
branch = "main"
content_dir = "content"

[git]
binary = "git"
command_timeout_secs = 60
author_name = "{{AUTHOR}}"
author_email = "blog-api@localhost"

[lock]
# Defaults to blog-git.lock in the temp directory
# path = "/tmp/blog-git.lock"
timeout_secs = 60

[content]
timezone = "+09:00"
default_categories = ["Development"]

# Added to the front matter of every new post
[content.front_matter]
ShowToc = true
TocOpen = true

[server]
address = "0.0.0.0"
port = 8000
# Or BLOG_API_KEYS=key1,key2
api_keys = []

[log]
level = "Info"
log_to_console = true
# Without location, logs go to <cache dir>/blogstore/log
# location = "${exe_dir}/log/blogd.log"
max_files = 60
"#;

pub fn get_sample_cfg(author: &str) -> String {
    CONFIG_SAMPLE.replace("{{AUTHOR}}", author)
}

pub fn write_sample_cfg(file_path: &Path, author: &str) -> io::Result<()> {
    let mut file = File::create(file_path)?;
    file.write_all(get_sample_cfg(author).as_bytes())
}
