//! Notice texts sent to authors.

use crate::analyzer::PostMetadata;

pub const REAPPROVAL_SUBJECT: &str = "Please reapprove submission";

/// Renders a number of seconds as "H hours, M minutes, S seconds". Hours are
/// not wrapped into days.
pub fn englishify_time(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let (hours, rest) = (seconds / 3600, seconds % 3600);
    let (minutes, seconds) = (rest / 60, rest % 60);
    format!("{hours} hours, {minutes} minutes, {seconds} seconds")
}

/// Links the removal notice needs; built by the platform client.
#[derive(Debug, Clone)]
pub struct RemovalLinks {
    pub contact: String,
    pub reapproval: String,
}

#[derive(Debug, Clone)]
pub struct MessageBuilder {
    subreddit: String,
}

impl MessageBuilder {
    pub fn new(subreddit: &str) -> Self {
        Self {
            subreddit: subreddit.to_string(),
        }
    }

    fn footer(&self, contact_link: &str) -> String {
        format!(
            "\n\n_I am a bot, and this was automatically posted. \
             Do not reply to me as messages will be ignored. \
             Please [contact the moderators of this subreddit]({contact_link}) \
             if you have any questions, concerns, or bugs to report._"
        )
    }

    pub fn series_pm_subject(&self) -> String {
        format!("Reminder about your series post on r/{}", self.subreddit)
    }

    /// Body of the reapproval request the author sends to the moderators.
    pub fn create_approval_msg(&self, post_url: &str) -> String {
        format!(
            "[My post]({post_url}) to /r/{} was removed for formatting issues. \
             I have fixed those issues and am now requesting re-approval.\
             \n\n_Note to moderation team: if this story is eligible for re-approval, \
             remember to remove the bot's comment from it._",
            self.subreddit
        )
    }

    pub fn create_post_a_day_msg(&self, remaining: &str, contact_link: &str) -> String {
        let mut msg = format!(
            "Hi there! /r/{sub} limits posts to one post per author per day, \
             in order to give all submitters here an equal shot at the front page.\
             \n\nAs such, your post has been removed. Feel free to repost your story \
             in **{remaining}**.\
             \n\nIf you believe your post was removed in error, please \
             [message the moderators]({contact_link}).",
            sub = self.subreddit
        );
        msg.push_str(&self.footer(contact_link));
        msg
    }

    /// Builds the removal notice for a submission with tag, title or
    /// formatting problems.
    ///
    /// Title problems (invalid tags, "NSFW") make the removal permanent since
    /// titles cannot be edited; formatting problems alone make it temporary and
    /// offer a reapproval link. The contact footer is always appended.
    pub fn create_deleted_post_msg(
        &self,
        post_url: &str,
        meta: &PostMetadata,
        links: &RemovalLinks,
    ) -> String {
        let mut msg = String::new();

        if meta.has_title_issues() {
            msg.push_str(&format!(
                "Hi there! [Your post]({post_url}) has been removed from /r/{} \
                 for violating the following rules:",
                self.subreddit
            ));
            if !meta.invalid_tags.is_empty() {
                msg.push_str(&self.invalid_tags_section(&meta.bad_tags()));
            }
            if meta.has_nsfw_title {
                msg.push_str(&self.nsfw_title_section());
            }
            msg.push_str(
                "\n\n**Since titles cannot be edited on Reddit, please repost your story \
                 with a corrected title.**",
            );
            if meta.has_formatting_issues() {
                msg.push_str(
                    "\n\nAdditionally, the following issues have been detected in your post, \
                     which either violate rules or may make your post unreadable. \
                     Please correct them when re-posting your story.",
                );
                self.push_formatting_sections(&mut msg, meta);
            }
        } else {
            msg.push_str(&format!(
                "Hi there! [Your post]({post_url}) has been **temporarily** removed from /r/{} \
                 due to the following formatting issues detected in your post:",
                self.subreddit
            ));
            self.push_formatting_sections(&mut msg, meta);
            msg.push_str(&format!(
                "\n\n**Once you have fixed your formatting issues, please \
                 [click here]({}) to request reapproval.** \
                 The re-approval process is manual, so send a single request only. \
                 Multiple requests do not mean faster approval; in fact they will clog \
                 the modqueue and result in re-approvals taking even more time.",
                links.reapproval
            ));
        }

        msg.push_str(&self.footer(&links.contact));
        msg
    }

    fn invalid_tags_section(&self, bad_tags: &str) -> String {
        format!(
            "\n\n* **Invalid Tags**\n\n  \
             /r/{} has strict rules about tags in story titles. \
             Your title contains: {bad_tags}\n\n  \
             **Tags (example: [True], [real experience]) are not allowed.** \
             The only thing in brackets **[]**, **{{}}**, **||** or parenthesis **()** \
             should be a reference to which \"part\" of your series the post is. \
             **Example**: (part 1) or [Pt2].",
            self.subreddit
        )
    }

    fn nsfw_title_section(&self) -> String {
        format!(
            "\n\n* **Title contains \"NSFW\"**\n\n  \
             Your post title appears to include **NSFW** in the title. /r/{} \
             does not allow **NSFW** to be stated in the title of stories. Stories \
             can be marked **NSFW** after they are posted by clicking **NSFW** or \
             **Add Trigger Warning** (depending on your UI) at the bottom of the post.",
            self.subreddit
        )
    }

    fn push_formatting_sections(&self, msg: &mut String, meta: &PostMetadata) {
        if meta.has_long_paragraphs {
            msg.push_str(
                "\n\n* **Long Paragraphs Detected**\n\n  \
                 You have one or more paragraphs containing more than 350 words. \
                 Please break up your story into smaller paragraphs. You can create \
                 paragraphs by pressing `Enter` twice at the end of a line.",
            );
        }
        if meta.has_codeblocks {
            msg.push_str(
                "\n\n* **Paragraph with 4 (or more) Starting Spaces Detected**\n\n  \
                 You have one or more paragraphs beginning with a tab or four or more spaces.\
                 \n\n  On Reddit, lines beginning with a tab or four or more spaces are \
                 treated as blocks of code and make your story unreadable. Please remove \
                 tabs or spaces at the beginning of paragraphs/lines. You can create \
                 paragraphs by pressing `Enter` twice at the end of a line if you haven't \
                 already done so.",
            );
        }
    }

    pub fn create_series_msg(&self, post_url: &str) -> String {
        format!(
            "Hi there! It looks like you are writing an /r/{} series! Awesome! \
             Please be sure to double-check that [your post]({post_url}) has \"series\" \
             flair and please remember to include a link to the previous part at the \
             top of your story.\
             \n\nDon't know how to add flair? Visit your story's comment page and look \
             underneath the post itself. Click on the **flair** button to bring up a list \
             of options. Choose the \"series\" option and hit \"save\"!",
            self.subreddit
        )
    }

    pub fn create_series_comment(&self, subscribe_url: &str) -> String {
        format!(
            "It looks like there may be more to this story. \
             Click [here]({subscribe_url}) to get notified when the author posts \
             the next part."
        )
    }

    /// Message body for the subscription bot, addressed on behalf of the reader.
    pub fn series_subscribe_body(&self, author: &str) -> String {
        format!("SubscribeMe! /r/{} /u/{author}", self.subreddit)
    }
}
