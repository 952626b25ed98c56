//! Rules for crediting a post in the vouch channel.

use vouchledger_core::{LedgerBackend, LedgerError, UserId, VouchStats};

use crate::config::VouchConfig;

const IMAGE_EXTENSIONS: [&str; 5] = [".png", ".jpg", ".jpeg", ".gif", ".webp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: Option<String>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, content_type: Option<&str>) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.map(str::to_string),
        }
    }

    /// Parses `filename[:content-type]`.
    pub fn parse(spec: &str) -> Self {
        match spec.split_once(':') {
            Some((filename, content_type)) if !content_type.is_empty() => {
                Self::new(filename, Some(content_type))
            }
            Some((filename, _)) => Self::new(filename, None),
            None => Self::new(spec, None),
        }
    }

    pub fn is_image(&self) -> bool {
        if let Some(ct) = &self.content_type {
            if ct.starts_with("image/") {
                return true;
            }
        }
        let name = self.filename.to_ascii_lowercase();
        IMAGE_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
    }
}

#[derive(Debug, Clone)]
pub struct Post {
    pub author_id: UserId,
    pub author_is_bot: bool,
    pub channel_id: u64,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VouchPolicy {
    pub channel_id: u64,
    pub points_per_picture: i64,
}

impl From<&VouchConfig> for VouchPolicy {
    fn from(config: &VouchConfig) -> Self {
        Self {
            channel_id: config.channel_id,
            points_per_picture: config.points_per_picture,
        }
    }
}

impl VouchPolicy {
    /// Points the post earns, or `None` when it does not qualify.
    pub fn award_for(&self, post: &Post) -> Option<i64> {
        if post.author_is_bot || self.channel_id == 0 || post.channel_id != self.channel_id {
            return None;
        }
        let images = post.attachments.iter().filter(|a| a.is_image()).count();
        if images == 0 {
            return None;
        }
        Some(self.points_per_picture.saturating_mul(images as i64))
    }
}

/// Credits a qualifying post as one vouch worth its picture points. Posts that
/// do not qualify leave the ledger untouched and return `None`.
pub fn credit_post(
    ledger: &dyn LedgerBackend,
    policy: &VouchPolicy,
    post: &Post,
) -> Result<Option<VouchStats>, LedgerError> {
    let Some(points) = policy.award_for(post) else {
        return Ok(None);
    };

    let stats = ledger.record_vouch(post.author_id, points)?;
    metrics::increment_counter!("vouchledger_posts_credited_total");
    metrics::counter!("vouchledger_points_awarded_total", points.max(0) as u64);
    tracing::info!(
        user_id = post.author_id,
        points,
        total_points = stats.points,
        total_vouches = stats.total_vouches,
        "Vouch post credited"
    );
    Ok(Some(stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHANNEL: u64 = 1_426_271_314_792_157_346;

    fn policy() -> VouchPolicy {
        VouchPolicy { channel_id: CHANNEL, points_per_picture: 2 }
    }

    fn post(attachments: &[&str]) -> Post {
        Post {
            author_id: 7,
            author_is_bot: false,
            channel_id: CHANNEL,
            attachments: attachments.iter().map(|a| Attachment::parse(a)).collect(),
        }
    }

    #[test]
    fn images_are_detected_by_type_or_extension() {
        assert!(Attachment::parse("proof.PNG").is_image());
        assert!(Attachment::parse("proof.webp").is_image());
        assert!(Attachment::parse("blob:image/jpeg").is_image());
        assert!(!Attachment::parse("notes.txt:text/plain").is_image());
        assert!(!Attachment::parse("archive.zip").is_image());
        assert!(!Attachment::parse("clip.mp4:video/mp4").is_image());
    }

    #[test]
    fn award_counts_images_only() {
        assert_eq!(policy().award_for(&post(&["a.png", "b.jpg", "c.txt"])), Some(4));
        assert_eq!(policy().award_for(&post(&["c.txt"])), None);
        assert_eq!(policy().award_for(&post(&[])), None);
    }

    #[test]
    fn wrong_channel_bots_and_unset_channel_do_not_qualify() {
        let mut p = post(&["a.png"]);
        p.channel_id = 1;
        assert_eq!(policy().award_for(&p), None);

        let mut p = post(&["a.png"]);
        p.author_is_bot = true;
        assert_eq!(policy().award_for(&p), None);

        let unset = VouchPolicy { channel_id: 0, points_per_picture: 1 };
        let mut p = post(&["a.png"]);
        p.channel_id = 0;
        assert_eq!(unset.award_for(&p), None);
    }
}
