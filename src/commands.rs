use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use muraldb::auth::{NewAccount, ProfileUpdate};
use muraldb::bookmarks::BookmarkedItem;
use muraldb::ingest::scanner::scan_images;
use muraldb::ingest::source::read_local_file;
use muraldb::library::{Upload, RECENT_LIMIT};
use muraldb::model::{BookmarkKind, Category, Folder, Gallery, ItemKind, TagId};
use muraldb::Session;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an account and sign in
    Signup {
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        screen_name: String,
    },
    Signin {
        email: String,
        #[arg(long)]
        password: String,
    },
    Signout,
    /// Send a password reset email
    ResetPassword { email: String },
    /// Show the signed-in user
    Whoami,
    /// Edit the signed-in user's profile
    Profile {
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long)]
        screen_name: Option<String>,
        #[arg(long)]
        picture: Option<String>,
    },
    #[command(subcommand)]
    Gallery(GalleryCommand),
    #[command(subcommand)]
    Folder(FolderCommand),
    #[command(subcommand)]
    Doc(DocCommand),
    #[command(subcommand)]
    Tag(TagCommand),
    #[command(subcommand)]
    Bookmark(BookmarkCommand),
    /// Browse everyone's showcased work
    #[command(subcommand)]
    Showcase(ShowcaseCommand),
    /// Newest uploads across galleries and folders
    Recent {
        #[arg(short, long, default_value_t = RECENT_LIMIT)]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
pub enum GalleryCommand {
    Create {
        name: String,
        #[arg(short, long, default_value = "art")]
        category: Category,
        #[arg(short, long, default_value = "")]
        description: String,
        /// Tag name or id; repeatable
        #[arg(short, long)]
        tag: Vec<String>,
    },
    List {
        #[arg(short, long)]
        category: Option<Category>,
        /// Only galleries where the gallery or an image carries every given tag
        #[arg(short, long)]
        tag: Vec<String>,
    },
    Show { id: String },
    Rename {
        id: String,
        name: String,
        #[arg(short, long)]
        description: Option<String>,
    },
    Delete { id: String },
    Upload {
        id: String,
        file: PathBuf,
        #[arg(short, long)]
        tag: Vec<String>,
    },
    /// Upload every image below a directory
    UploadDir {
        id: String,
        dir: PathBuf,
        #[arg(short, long)]
        tag: Vec<String>,
    },
    RemoveImage { id: String, image_id: String },
    Pin { id: String },
    Unpin { id: String },
    Showcase { id: String },
    Unshowcase { id: String },
}

#[derive(Subcommand, Debug)]
pub enum FolderCommand {
    Create {
        name: String,
        #[arg(short, long, default_value = "")]
        description: String,
        #[arg(short, long)]
        tag: Vec<String>,
    },
    List {
        /// Only folders where the folder or a document carries every given tag
        #[arg(short, long)]
        tag: Vec<String>,
    },
    Show { id: String },
    Rename { id: String, name: String },
    Delete { id: String },
    Pin { id: String },
    Unpin { id: String },
    Showcase { id: String },
    Unshowcase { id: String },
}

#[derive(Subcommand, Debug)]
pub enum DocCommand {
    Upload {
        file: PathBuf,
        #[arg(short, long)]
        folder: Option<String>,
        #[arg(short, long)]
        tag: Vec<String>,
    },
    List {
        #[arg(short, long)]
        folder: Option<String>,
    },
    Delete { id: String },
    /// Move a document into a folder, or out of any folder without --folder
    Move {
        id: String,
        #[arg(short, long)]
        folder: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum TagCommand {
    Create {
        name: String,
        #[arg(short, long, default_value = "#888888")]
        color: String,
    },
    List,
    Rename {
        tag: String,
        name: String,
        #[arg(short, long)]
        color: Option<String>,
    },
    Delete { tag: String },
    Attach {
        tag: String,
        kind: ItemKind,
        item: String,
    },
    Detach { tag: String, item: String },
    /// Tags attached to an item
    Show { item: String },
    /// Items carrying every given tag
    Filter {
        #[arg(required = true)]
        tags: Vec<String>,
        #[arg(short, long)]
        kind: Option<ItemKind>,
    },
}

#[derive(Subcommand, Debug)]
pub enum BookmarkCommand {
    Add { kind: BookmarkKind, id: String },
    Remove { id: String },
    List,
}

#[derive(Subcommand, Debug)]
pub enum ShowcaseCommand {
    Galleries {
        #[arg(short, long, default_value = "art")]
        category: Category,
        #[arg(short, long, default_value = "")]
        search: String,
    },
    Folders {
        #[arg(short, long, default_value = "")]
        search: String,
    },
}

pub fn run(session: &mut Session, command: Command) -> Result<()> {
    match command {
        Command::Signup {
            email,
            password,
            first_name,
            last_name,
            screen_name,
        } => {
            let profile = session.signup(&NewAccount {
                email,
                password,
                first_name,
                last_name,
                screen_name,
            })?;
            println!("Welcome, {} (@{})", profile.display_name(), profile.screen_name);
        }
        Command::Signin { email, password } => {
            let profile = session.signin(&email, &password)?;
            println!("Signed in as {} (@{})", profile.display_name(), profile.screen_name);
        }
        Command::Signout => {
            session.signout()?;
            println!("Signed out");
        }
        Command::ResetPassword { email } => {
            session.request_password_reset(&email)?;
            println!("Password reset email sent to {email}");
        }
        Command::Whoami => match session.whoami()? {
            Some(profile) => println!(
                "{} (@{}) <{}> uid {}",
                profile.display_name(),
                profile.screen_name,
                profile.email,
                profile.uid
            ),
            None => println!("Not signed in"),
        },
        Command::Profile {
            first_name,
            last_name,
            screen_name,
            picture,
        } => {
            let profile = session.update_profile(&ProfileUpdate {
                first_name,
                last_name,
                screen_name,
                profile_picture: picture,
            })?;
            println!("Profile updated: {} (@{})", profile.display_name(), profile.screen_name);
        }
        Command::Gallery(cmd) => gallery(session, cmd)?,
        Command::Folder(cmd) => folder(session, cmd)?,
        Command::Doc(cmd) => doc(session, cmd)?,
        Command::Tag(cmd) => tag(session, cmd)?,
        Command::Bookmark(cmd) => bookmark(session, cmd)?,
        Command::Showcase(ShowcaseCommand::Galleries { category, search }) => {
            for g in session.showcase_galleries(category, &search)? {
                print_gallery(&g);
            }
        }
        Command::Showcase(ShowcaseCommand::Folders { search }) => {
            for f in session.showcase_folders(&search)? {
                print_folder(&f);
            }
        }
        Command::Recent { limit } => {
            for upload in session.recent(limit)? {
                let kind = match &upload {
                    Upload::Image { .. } => "image",
                    Upload::Document(_) => "document",
                };
                println!(
                    "{}  {:<8} {}  {}",
                    upload.uploaded_at().format("%Y-%m-%d %H:%M"),
                    kind,
                    upload.id(),
                    upload.name()
                );
            }
        }
    }
    Ok(())
}

fn gallery(session: &mut Session, cmd: GalleryCommand) -> Result<()> {
    match cmd {
        GalleryCommand::Create {
            name,
            category,
            description,
            tag,
        } => {
            let tags = tag_ids(session, &tag)?;
            let g = session.create_gallery(&name, &description, category, tags)?;
            println!("Created gallery {} ({})", g.name, g.id);
        }
        GalleryCommand::List { category, tag } => {
            let galleries = if tag.is_empty() {
                session.list_galleries(category)?
            } else {
                let selected = tag_ids(session, &tag)?;
                session.galleries_tagged(category, &selected)?
            };
            for g in &galleries {
                print_gallery(g);
            }
        }
        GalleryCommand::Show { id } => {
            let g = session.gallery(&id)?;
            print_gallery(&g);
            if !g.description.is_empty() {
                println!("  {}", g.description);
            }
            for image in &g.images {
                println!(
                    "  {}  {}  {} bytes  {}",
                    image.id, image.name, image.size, image.url
                );
            }
        }
        GalleryCommand::Rename {
            id,
            name,
            description,
        } => {
            session.rename_gallery(&id, &name)?;
            if let Some(description) = description {
                session.describe_gallery(&id, &description)?;
            }
            println!("Gallery renamed to {name}");
        }
        GalleryCommand::Delete { id } => {
            let g = session.delete_gallery(&id)?;
            println!("Deleted gallery {} and {} image(s)", g.name, g.images.len());
        }
        GalleryCommand::Upload { id, file, tag } => {
            let tags = tag_ids(session, &tag)?;
            let local = read_local_file(&file)?;
            let image = session.upload_image(&id, &local.name, &local.bytes, tags)?;
            println!("Uploaded {} ({})", image.name, image.id);
        }
        GalleryCommand::UploadDir { id, dir, tag } => upload_dir(session, &id, &dir, &tag)?,
        GalleryCommand::RemoveImage { id, image_id } => {
            session.remove_image(&id, &image_id)?;
            println!("Removed image {image_id}");
        }
        GalleryCommand::Pin { id } => {
            let slot = session.pin_gallery(&id)?;
            println!("Pinned in slot {}", slot + 1);
        }
        GalleryCommand::Unpin { id } => {
            session.unpin_gallery(&id)?;
            println!("Unpinned");
        }
        GalleryCommand::Showcase { id } => {
            let slot = session.showcase_gallery(&id)?;
            println!("Added to the showcase at position {}", slot + 1);
        }
        GalleryCommand::Unshowcase { id } => {
            session.unshowcase_gallery(&id)?;
            println!("Removed from the showcase");
        }
    }
    Ok(())
}

fn upload_dir(session: &mut Session, gallery_id: &str, dir: &Path, tags: &[String]) -> Result<()> {
    // fail before walking a large tree
    session.gallery(gallery_id)?;
    let tags = tag_ids(session, tags)?;
    let files = scan_images(dir).with_context(|| format!("Failed to scan {:?}", dir))?;
    info!("Found {} image(s) under {:?}", files.len(), dir);

    let bar = ProgressBar::new(files.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut failed = 0;
    for path in &files {
        bar.set_message(path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default());
        let uploaded = read_local_file(path).and_then(|local| {
            session
                .upload_image(gallery_id, &local.name, &local.bytes, tags.clone())
                .map_err(anyhow::Error::from)
        });
        if let Err(e) = uploaded {
            warn!("Failed to upload {:?}: {:#}", path, e);
            failed += 1;
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    println!("Uploaded {} of {} image(s)", files.len() - failed, files.len());
    Ok(())
}

fn folder(session: &mut Session, cmd: FolderCommand) -> Result<()> {
    match cmd {
        FolderCommand::Create {
            name,
            description,
            tag,
        } => {
            let tags = tag_ids(session, &tag)?;
            let f = session.create_folder(&name, &description, tags)?;
            println!("Created folder {} ({})", f.name, f.id);
        }
        FolderCommand::List { tag } => {
            let folders = if tag.is_empty() {
                session.list_folders()?
            } else {
                let selected = tag_ids(session, &tag)?;
                session.folders_tagged(&selected)?
            };
            for f in &folders {
                print_folder(f);
            }
        }
        FolderCommand::Show { id } => {
            let f = session.folder(&id)?;
            print_folder(&f);
            for d in session.folder_documents(&id)? {
                println!("  {}  {}  {}  {} bytes", d.id, d.name, d.content_type, d.size);
            }
        }
        FolderCommand::Rename { id, name } => {
            session.rename_folder(&id, &name)?;
            println!("Folder renamed to {name}");
        }
        FolderCommand::Delete { id } => {
            let f = session.delete_folder(&id)?;
            println!("Deleted folder {} and {} document(s)", f.name, f.documents.len());
        }
        FolderCommand::Pin { id } => {
            let slot = session.pin_folder(&id)?;
            println!("Pinned in slot {}", slot + 1);
        }
        FolderCommand::Unpin { id } => {
            session.unpin_folder(&id)?;
            println!("Unpinned");
        }
        FolderCommand::Showcase { id } => {
            let slot = session.showcase_folder(&id)?;
            println!("Added to the showcase at position {}", slot + 1);
        }
        FolderCommand::Unshowcase { id } => {
            session.unshowcase_folder(&id)?;
            println!("Removed from the showcase");
        }
    }
    Ok(())
}

fn doc(session: &mut Session, cmd: DocCommand) -> Result<()> {
    match cmd {
        DocCommand::Upload { file, folder, tag } => {
            let tags = tag_ids(session, &tag)?;
            let local = read_local_file(&file)?;
            let d = session.upload_document(&local.name, &local.bytes, folder.as_deref(), tags)?;
            println!("Uploaded {} ({}, {})", d.name, d.id, d.content_type);
        }
        DocCommand::List { folder } => {
            let documents = match folder {
                Some(folder) => session.folder_documents(&folder)?,
                None => session.list_documents()?,
            };
            for d in documents {
                println!(
                    "{}  {}  {}  {}",
                    d.id,
                    d.name,
                    d.folder_id.as_deref().unwrap_or("-"),
                    d.uploaded_at.format("%Y-%m-%d")
                );
            }
        }
        DocCommand::Delete { id } => {
            let d = session.delete_document(&id)?;
            println!("Deleted {}", d.name);
        }
        DocCommand::Move { id, folder } => {
            session.move_document(&id, folder.as_deref())?;
            match folder {
                Some(folder) => println!("Moved to folder {folder}"),
                None => println!("Moved out of its folder"),
            }
        }
    }
    Ok(())
}

fn tag(session: &mut Session, cmd: TagCommand) -> Result<()> {
    match cmd {
        TagCommand::Create { name, color } => {
            let t = session.create_tag(&name, &color)?;
            println!("Created tag {} {} ({})", t.name, t.color, t.id);
        }
        TagCommand::List => {
            for t in session.tags()?.tags() {
                println!("{}  {}  {}", t.id, t.color, t.name);
            }
        }
        TagCommand::Rename { tag, name, color } => {
            let id = session.resolve_tag(&tag)?.id;
            let t = session.update_tag(&id, Some(&name), color.as_deref())?;
            println!("Tag is now {} {}", t.name, t.color);
        }
        TagCommand::Delete { tag } => {
            let t = session.resolve_tag(&tag)?;
            session.delete_tag(&t.id)?;
            println!("Deleted tag {}", t.name);
        }
        TagCommand::Attach { tag, kind, item } => {
            let t = session.resolve_tag(&tag)?;
            session.tag_item(&item, kind, &t.id)?;
            println!("Tagged {kind} {item} with {}", t.name);
        }
        TagCommand::Detach { tag, item } => {
            let t = session.resolve_tag(&tag)?;
            session.untag_item(&item, &t.id)?;
            println!("Removed {} from {item}", t.name);
        }
        TagCommand::Show { item } => {
            let tags = session.item_tags(&item)?;
            if tags.is_empty() {
                println!("{item} has no tags");
            }
            for t in tags {
                println!("{}  {}", t.color, t.name);
            }
        }
        TagCommand::Filter { tags, kind } => {
            let selected = tag_ids(session, &tags)?;
            for item in session.items_by_tags(&selected, kind)? {
                println!("{:<8} {}", item.item_type, item.item_id);
            }
        }
    }
    Ok(())
}

fn bookmark(session: &mut Session, cmd: BookmarkCommand) -> Result<()> {
    match cmd {
        BookmarkCommand::Add { kind, id } => {
            let b = session.bookmark(&id, kind)?;
            println!("Bookmarked {} {}", b.item_type, b.item_id);
        }
        BookmarkCommand::Remove { id } => {
            let removed = session.unbookmark(&id)?;
            if removed == 0 {
                println!("{id} was not bookmarked");
            } else {
                println!("Bookmark removed");
            }
        }
        BookmarkCommand::List => {
            for item in session.bookmarked_items()? {
                match item {
                    BookmarkedItem::Gallery(_, g) => print_gallery(&g),
                    BookmarkedItem::Folder(_, f) => print_folder(&f),
                }
            }
        }
    }
    Ok(())
}

fn tag_ids(session: &mut Session, tags: &[String]) -> Result<Vec<TagId>> {
    tags.iter()
        .map(|t| -> Result<TagId> { Ok(session.resolve_tag(t)?.id) })
        .collect()
}

fn pin_marker(pinned: bool, showcased: bool) -> &'static str {
    match (pinned, showcased) {
        (true, true) => "*+",
        (true, false) => "* ",
        (false, true) => " +",
        (false, false) => "  ",
    }
}

fn print_gallery(g: &Gallery) {
    println!(
        "{} {}  {:<10} {}  ({} image(s))",
        pin_marker(g.pins.pinned, g.pins.showcase_pinned),
        g.id,
        g.category,
        g.name,
        g.images.len()
    );
}

fn print_folder(f: &Folder) {
    println!(
        "{} {}  {}  ({} document(s))",
        pin_marker(f.pins.pinned, f.pins.showcase_pinned),
        f.id,
        f.name,
        f.documents.len()
    );
}
