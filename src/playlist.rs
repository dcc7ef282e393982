//! Tab-delimited playlist with a per-song vote tally.
//!
//! Line format: `name<TAB>path[<TAB>voter,voter,...[<TAB>status]]`. The file
//! has several writers (the engine tallying votes, front ends adding them), so
//! every read holds a shared lock and every rewrite runs as one
//! read-modify-write transaction under an exclusive lock.

use log::{debug, info};
use rand::Rng;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{LightshowError, Result};
use crate::persist::{write_atomic, FileLock};
use crate::state::ControlState;

/// Status written on a song chosen by vote; songs with any status are out of
/// the vote count.
pub const PLAYING_STATUS: &str = "playing!";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Song {
    pub name: String,
    /// As written in the playlist; may contain `$SYNCHRONIZED_LIGHTS_HOME`.
    pub path: String,
    pub votes: BTreeSet<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Playlist {
    pub songs: Vec<Song>,
}

impl Playlist {
    /// Parse playlist text. Blank lines are skipped; any other line without
    /// 2 to 4 fields is an error.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let mut songs = Vec::new();
        for (number, raw) in text.lines().enumerate() {
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if !(2..=4).contains(&fields.len()) {
                return Err(LightshowError::Playlist {
                    path: path.to_path_buf(),
                    line: number + 1,
                    reason: format!(
                        "expected <song name><TAB><path to song>[<TAB>votes[<TAB>status]], found {} fields",
                        fields.len()
                    ),
                });
            }
            let votes = fields
                .get(2)
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default();
            let status = fields
                .get(3)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string());
            songs.push(Song {
                name: fields[0].to_string(),
                path: fields[1].to_string(),
                votes,
                status,
            });
        }
        Ok(Self { songs })
    }

    pub fn to_tsv(&self) -> String {
        let mut out = String::new();
        for song in &self.songs {
            let votes = song.votes.iter().cloned().collect::<Vec<_>>().join(",");
            let line = match (&song.status, votes.is_empty()) {
                (Some(status), _) => format!("{}\t{}\t{}\t{}\n", song.name, song.path, votes, status),
                (None, false) => format!("{}\t{}\t{}\n", song.name, song.path, votes),
                (None, true) => format!("{}\t{}\n", song.name, song.path),
            };
            out.push_str(&line);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    /// Index of the song with the most votes among songs without a status.
    /// Ties go to the earliest song; a playlist without votes has no winner.
    pub fn most_voted(&self) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;
        for (index, song) in self.songs.iter().enumerate() {
            if song.status.is_some() || song.votes.is_empty() {
                continue;
            }
            if best.map_or(true, |(_, count)| song.votes.len() > count) {
                best = Some((index, song.votes.len()));
            }
        }
        best.map(|(index, _)| index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionReason {
    Votes,
    PlayNow,
    Random,
    Sequential,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// 0-based position in the playlist file.
    pub index: usize,
    pub song: Song,
    pub reason: SelectionReason,
}

pub struct PlaylistStore {
    path: PathBuf,
}

impl PlaylistStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Playlist> {
        let _lock = FileLock::shared(&self.path)?;
        self.read_unlocked()
    }

    fn read_unlocked(&self) -> Result<Playlist> {
        let text = std::fs::read_to_string(&self.path)?;
        Playlist::parse(&text, &self.path)
    }

    /// Run `f` against a freshly read playlist while holding the exclusive
    /// lock, then write the result back atomically.
    pub fn transact<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Playlist) -> Result<T>,
    {
        let _lock = FileLock::exclusive(&self.path)?;
        let mut playlist = self.read_unlocked()?;
        let result = f(&mut playlist)?;
        write_atomic(&self.path, playlist.to_tsv().as_bytes())?;
        Ok(result)
    }

    /// Record a vote for the song at `index` (0-based).
    pub fn vote(&self, index: usize, voter: &str) -> Result<()> {
        let path = self.path.clone();
        self.transact(|playlist| {
            let count = playlist.len();
            let song = playlist.songs.get_mut(index).ok_or_else(|| LightshowError::Playlist {
                path,
                line: index + 1,
                reason: format!("no song at index {} of {}", index, count),
            })?;
            song.votes.insert(voter.to_string());
            Ok(())
        })
    }

    /// Pick the next song: the most voted one, then a pending play-now
    /// request, then a random song when `randomize` is set, then the
    /// sequential cursor. The choice is stored as `current_song`.
    pub fn select_next<R: Rng>(
        &self,
        control: &dyn ControlState,
        randomize: bool,
        rng: &mut R,
    ) -> Result<Selection> {
        let playlist = self.load()?;
        if playlist.is_empty() {
            return Err(LightshowError::EmptyPlaylist(self.path.clone()));
        }

        let mut selection = None;
        if playlist.most_voted().is_some() {
            // Re-evaluate under the exclusive lock; votes may have moved.
            selection = self.transact(|fresh| {
                Ok(fresh.most_voted().map(|index| {
                    fresh.songs[index].status = Some(PLAYING_STATUS.to_string());
                    (index, fresh.songs[index].clone())
                }))
            })?;
            if let Some((index, song)) = &selection {
                info!("Choosing next song based upon votes: {} ({} votes)", song.name, song.votes.len());
                debug!("Marked song {} as {}", index, PLAYING_STATUS);
            }
        }

        let (index, song, reason) = match selection {
            Some((index, song)) => (index, song, SelectionReason::Votes),
            None => self.select_without_votes(&playlist, control, randomize, rng)?,
        };
        control.set_current_song(index)?;
        Ok(Selection { index, song, reason })
    }

    fn select_without_votes<R: Rng>(
        &self,
        playlist: &Playlist,
        control: &dyn ControlState,
        randomize: bool,
        rng: &mut R,
    ) -> Result<(usize, Song, SelectionReason)> {
        let count = playlist.len();
        let play_now = control.play_now()? as usize;
        if (1..=count).contains(&play_now) {
            let index = play_now - 1;
            info!("Playing requested song {}: {}", play_now, playlist.songs[index].name);
            return Ok((index, playlist.songs[index].clone(), SelectionReason::PlayNow));
        }
        if play_now != 0 {
            info!("Ignoring play now request {} for a playlist of {} songs", play_now, count);
            control.set_play_now(0)?;
        }
        if randomize {
            let index = rng.gen_range(0..count);
            debug!("Randomly chose song {}", index);
            return Ok((index, playlist.songs[index].clone(), SelectionReason::Random));
        }

        let cursor = control.song_to_play()?;
        let index = if cursor < count { cursor } else { 0 };
        let next = if index + 1 < count { index + 1 } else { 0 };
        control.set_song_to_play(next)?;
        debug!("Sequential cursor {} -> {}", index, next);
        Ok((index, playlist.songs[index].clone(), SelectionReason::Sequential))
    }
}
