use log::{debug, info};
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

pub const JPG_EXTENSION: &str = "jpg";
pub const TEMP_PROFILE_IMAGE_BASE_URL: &str = "https://robohash.org/";

/// 头像文件存储，每个用户一个目录
#[derive(Clone)]
pub struct ProfileImageStore {
    root: PathBuf,
}

impl ProfileImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn file_name(username: &str) -> String {
        format!("{}.{}", username, JPG_EXTENSION)
    }

    /// 用户名或文件名里带路径分隔符、`..` 时返回 None
    pub fn path_for(&self, username: &str, file_name: &str) -> Option<PathBuf> {
        if !is_single_component(username) || !is_single_component(file_name) {
            return None;
        }
        Some(self.root.join(username).join(file_name))
    }

    /// 覆盖保存头像，返回文件名
    pub async fn save(&self, username: &str, bytes: &[u8]) -> io::Result<String> {
        let file_name = Self::file_name(username);
        let target = self
            .path_for(username, &file_name)
            .ok_or_else(|| invalid_name(username))?;
        let folder = self.root.join(username);

        if fs::metadata(&folder).await.is_err() {
            fs::create_dir_all(&folder).await?;
            info!("创建目录: {}", folder.display());
        }

        // 先写临时文件再改名，读到的永远是完整的图片
        let temp = folder.join(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&temp, bytes).await?;
        if let Err(e) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }

        debug!("头像已保存: {} ({} 字节)", target.display(), bytes.len());
        Ok(file_name)
    }

    pub async fn remove_user(&self, username: &str) -> io::Result<()> {
        if !is_single_component(username) {
            return Err(invalid_name(username));
        }
        let folder = self.root.join(username);
        match fs::remove_dir_all(&folder).await {
            Ok(()) => {
                info!("删除目录: {}", folder.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn invalid_name(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, format!("非法路径: {}", name))
}
